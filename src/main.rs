use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use std::env;

use qbxml_bridge::config::{Config, DEFAULT_CONFIG_PATH};

fn print_instructions() {
    println!("QuickBooks Open Purchase Orders");
    println!("===============================");
    println!();
    println!("Reads configuration from config/config.toml and prints the open purchase");
    println!("orders of the configured classes as JSON.");
    println!();
    println!("Prerequisites:");
    println!("   1. QuickBooks Desktop and the QuickBooks SDK must be installed and running");
    println!("   2. A company file must be open in QuickBooks (or company_file set in config.toml)");
    println!();
    println!("Usage: qb_purchase_orders [--verbose] [--config <path>] [--since YYYY-MM-DD]");
    println!();
}

struct Args {
    verbose: bool,
    config_path: String,
    since: Option<NaiveDate>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        verbose: false,
        config_path: DEFAULT_CONFIG_PATH.to_string(),
        since: None,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" | "-v" => parsed.verbose = true,
            "--config" => {
                parsed.config_path = iter.next().context("--config requires a path")?.clone();
            }
            "--since" => {
                let value = iter.next().context("--since requires a date")?;
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .with_context(|| format!("Invalid --since date '{}', expected YYYY-MM-DD", value))?;
                parsed.since = Some(date);
            }
            other => return Err(anyhow::anyhow!("Unknown argument: {}", other)),
        }
    }

    Ok(parsed)
}

fn main() {
    match real_main() {
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        },
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

fn real_main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let args = parse_args(&args)?;

    if args.verbose {
        env_logger::builder().filter_level(log::LevelFilter::Debug).init();
    } else {
        env_logger::builder().filter_level(log::LevelFilter::Info).init();
    }

    print_instructions();

    info!("Loading configuration from {}...", args.config_path);
    let config = Config::load_from_file(&args.config_path)
        .context("Failed to load configuration file")?;
    info!("Configuration loaded successfully");

    run(config, args.since)
}

#[cfg(windows)]
fn run(config: Config, since: Option<NaiveDate>) -> Result<()> {
    use qbxml_bridge::purchase_orders::PurchaseOrderService;
    use qbxml_bridge::session::SessionManager;
    use qbxml_bridge::transport::com::ComTransport;

    info!("Connecting to QuickBooks Desktop...");
    let mut manager = SessionManager::new(ComTransport::new());
    if let Some(diagnostics) = config.diagnostics() {
        info!("Saving QBXML payloads to {}", diagnostics.dir().display());
        manager = manager.with_diagnostics(diagnostics);
    }

    let service = PurchaseOrderService::new(config.purchase_order_config());
    let mut session = manager
        .scoped(&config.session_config())
        .context("Failed to start QuickBooks session")?;
    info!("Successfully started QuickBooks session");

    let orders = service
        .open_purchase_orders(&mut session, since)
        .context("Failed to query purchase orders")?;
    session.end();

    println!("{}", serde_json::to_string_pretty(&orders)?);
    Ok(())
}

#[cfg(not(windows))]
fn run(_config: Config, _since: Option<NaiveDate>) -> Result<()> {
    Err(anyhow::anyhow!("QuickBooks Desktop is only reachable over COM on Windows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("qb_purchase_orders")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args_defaults() {
        let parsed = parse_args(&args(&[])).unwrap();
        assert!(!parsed.verbose);
        assert_eq!(parsed.config_path, DEFAULT_CONFIG_PATH);
        assert!(parsed.since.is_none());
    }

    #[test]
    fn test_parse_args_all_flags() {
        let parsed = parse_args(&args(&["-v", "--config", "alt.toml", "--since", "2024-03-01"])).unwrap();
        assert!(parsed.verbose);
        assert_eq!(parsed.config_path, "alt.toml");
        assert_eq!(parsed.since, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(&args(&["--since", "03/01/2024"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
