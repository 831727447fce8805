use anyhow::{Context, Result};
use figment::{Figment, providers::{Format, Toml}};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::diagnostics::Diagnostics;
use crate::purchase_orders::PurchaseOrderConfig;
use crate::request::{OnError, DEFAULT_QBXML_VERSION};
use crate::session::SessionConfig;
use crate::transport::ConnectionType;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
const DEFAULT_APPLICATION_NAME: &str = "QBXML Purchase Orders";
const DEFAULT_XML_DIR: &str = "qbxml-logs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub quickbooks: QuickBooksConfig,
    #[serde(default)]
    pub purchase_orders: PurchaseOrdersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickBooksConfig {
    pub application_id: Option<String>,  // AppID registered with QuickBooks, may be empty
    pub application_name: Option<String>,
    #[serde(default = "default_company_file")]
    pub company_file: String,  // "AUTO" uses the currently open company file
    #[serde(default)]
    pub connection_type: ConnectionType,
    pub qbxml_version: Option<String>,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub save_xml: bool,  // dump every request/response for debugging
    pub xml_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrdersConfig {
    #[serde(default = "default_allowed_classes")]
    pub allowed_classes: Vec<String>,
}

fn default_company_file() -> String {
    "AUTO".to_string()
}

fn default_allowed_classes() -> Vec<String> {
    vec!["Gifting".to_string()]
}

impl Default for PurchaseOrdersConfig {
    fn default() -> Self {
        Self {
            allowed_classes: default_allowed_classes(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(anyhow::anyhow!(
                "Configuration file not found at: {}. Please create it from config/config.example.toml",
                path.as_ref().display()
            ));
        }

        let mut config: Config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to parse configuration {}", path.as_ref().display()))?;

        config.apply_env_overrides();
        config.normalize_paths();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(company_file) = std::env::var("QB_COMPANY_FILE") {
            self.quickbooks.company_file = company_file;
        }

        if let Ok(app_id) = std::env::var("QB_APP_ID") {
            self.quickbooks.application_id = Some(app_id);
        }

        if let Ok(app_name) = std::env::var("QB_APP_NAME") {
            self.quickbooks.application_name = Some(app_name);
        }

        if let Ok(xml_dir) = std::env::var("QB_XML_DIR") {
            self.quickbooks.xml_dir = Some(xml_dir);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.quickbooks.company_file.is_empty() {
            return Err(anyhow::anyhow!("QuickBooks company file path cannot be empty (use AUTO for the open file)"));
        }

        if self.quickbooks.application_name.as_deref() == Some("") {
            return Err(anyhow::anyhow!("QuickBooks application name cannot be empty"));
        }

        let version = self.qbxml_version();
        if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(anyhow::anyhow!("Invalid qbxml_version '{}'", version));
        }

        if self.purchase_orders.allowed_classes.is_empty() {
            return Err(anyhow::anyhow!("purchase_orders.allowed_classes cannot be empty"));
        }

        Ok(())
    }

    pub fn qbxml_version(&self) -> &str {
        self.quickbooks.qbxml_version.as_deref().unwrap_or(DEFAULT_QBXML_VERSION)
    }

    pub fn session_config(&self) -> SessionConfig {
        let company_file = match self.quickbooks.company_file.as_str() {
            "AUTO" => "",
            path => path,
        };
        SessionConfig::new(self.quickbooks.application_name.as_deref().unwrap_or(DEFAULT_APPLICATION_NAME))
            .application_id(self.quickbooks.application_id.as_deref().unwrap_or_default())
            .company_file(company_file)
            .connection_type(self.quickbooks.connection_type)
    }

    pub fn purchase_order_config(&self) -> PurchaseOrderConfig {
        PurchaseOrderConfig {
            allowed_classes: self.purchase_orders.allowed_classes.clone(),
            qbxml_version: self.qbxml_version().to_string(),
            on_error: self.quickbooks.on_error,
        }
    }

    /// Diagnostics writer when `save_xml` is enabled.
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        self.quickbooks
            .save_xml
            .then(|| Diagnostics::new(self.quickbooks.xml_dir.as_deref().unwrap_or(DEFAULT_XML_DIR)))
    }

    /// Normalize file paths to handle Windows path separators
    fn normalize_paths(&mut self) {
        self.quickbooks.company_file = Self::normalize_windows_path(&self.quickbooks.company_file);
    }

    fn normalize_windows_path(path: &str) -> String {
        // Skip normalization for special values
        if path == "AUTO" || path.is_empty() {
            return path.to_string();
        }

        if cfg!(windows) && Self::is_windows_path(path) {
            let normalized = path.replace('/', "\\");
            log::info!("Normalized Windows path: '{}' -> '{}'", path, normalized);
            normalized
        } else {
            path.to_string()
        }
    }

    /// Check if a path looks like a Windows path
    fn is_windows_path(path: &str) -> bool {
        // Drive letters (C:, D:, etc.) or UNC paths (\\server)
        path.len() >= 3 && path.chars().nth(1) == Some(':') ||
        path.starts_with("\\\\") ||
        path.contains('\\')
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            quickbooks: QuickBooksConfig {
                application_id: None,
                application_name: None,
                company_file: default_company_file(),
                connection_type: ConnectionType::LocalQbd,
                qbxml_version: Some(DEFAULT_QBXML_VERSION.to_string()),
                on_error: OnError::StopOnError,
                save_xml: false,
                xml_dir: None,
            },
            purchase_orders: PurchaseOrdersConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.quickbooks.company_file, "AUTO");
        assert_eq!(config.qbxml_version(), "13.0");
        assert_eq!(config.purchase_orders.allowed_classes, vec!["Gifting"]);
        assert!(config.diagnostics().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_is_windows_path() {
        assert!(Config::is_windows_path("C:\\Users\\Test\\file.qbw"));
        assert!(Config::is_windows_path("\\\\server\\share\\file.qbw"));
        assert!(Config::is_windows_path("C:/Users/Test/file.qbw")); // Mixed separators

        assert!(!Config::is_windows_path("/unix/path/file.qbw"));
        assert!(!Config::is_windows_path("AUTO"));
        assert!(!Config::is_windows_path(""));
    }

    #[test]
    fn test_normalize_windows_path() {
        assert_eq!(Config::normalize_windows_path("AUTO"), "AUTO");
        assert_eq!(Config::normalize_windows_path(""), "");

        if cfg!(windows) {
            assert_eq!(Config::normalize_windows_path("C:/Users/Test/file.qbw"), "C:\\Users\\Test\\file.qbw");
        }

        assert_eq!(Config::normalize_windows_path("/unix/path/file.qbw"), "/unix/path/file.qbw");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.quickbooks.company_file = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.quickbooks.qbxml_version = Some("thirteen".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.purchase_orders.allowed_classes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_maps_auto_to_open_file() {
        let config = Config::default();
        let session = config.session_config();
        assert_eq!(session.company_file, "");
        assert_eq!(session.application_name, DEFAULT_APPLICATION_NAME);
        assert_eq!(session.application_id, "");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let (_dir, path) = write_config(
            r#"
[quickbooks]
application_name = "PO Sync"
company_file = "/data/Company.qbw"
connection_type = "localQBDLaunchUI"
qbxml_version = "16.0"
on_error = "continueOnError"
save_xml = true
xml_dir = "dumps"

[purchase_orders]
allowed_classes = ["Gifting", "Retail"]
"#,
        );

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.quickbooks.connection_type, ConnectionType::LocalQbdLaunchUi);
        assert_eq!(config.quickbooks.on_error, OnError::ContinueOnError);
        assert_eq!(config.session_config().company_file, "/data/Company.qbw");
        assert_eq!(config.purchase_order_config().qbxml_version, "16.0");
        assert_eq!(config.purchase_order_config().allowed_classes, vec!["Gifting", "Retail"]);
        assert_eq!(config.purchase_order_config().on_error, OnError::ContinueOnError);
        assert_eq!(config.diagnostics().unwrap().dir(), Path::new("dumps"));
    }

    #[test]
    #[serial]
    fn test_minimal_file_uses_defaults() {
        let (_dir, path) = write_config("[quickbooks]\n");
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.quickbooks.company_file, "AUTO");
        assert_eq!(config.quickbooks.connection_type, ConnectionType::LocalQbd);
        assert_eq!(config.purchase_orders.allowed_classes, vec!["Gifting"]);
    }

    #[test]
    #[serial]
    fn test_environment_variable_override() {
        let (_dir, path) = write_config("[quickbooks]\ncompany_file = \"AUTO\"\n");
        env::set_var("QB_COMPANY_FILE", "/override/Company.qbw");
        env::set_var("QB_APP_NAME", "Env App");

        let result = Config::load_from_file(&path);

        env::remove_var("QB_COMPANY_FILE");
        env::remove_var("QB_APP_NAME");

        let config = result.unwrap();
        assert_eq!(config.quickbooks.company_file, "/override/Company.qbw");
        assert_eq!(config.session_config().application_name, "Env App");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Configuration file not found"));
    }

    #[test]
    #[serial]
    fn test_invalid_file_is_an_error() {
        let (_dir, path) = write_config("[quickbooks]\nconnection_type = \"carrier pigeon\"\n");
        assert!(Config::load_from_file(&path).is_err());
    }
}
