//! Optional dumps of raw QBXML payloads for offline inspection.
//!
//! Each payload lands in its own file named `<YYYYmmdd-HHMMSS>-<uuid>-request.xml` or
//! `...-response.xml`. Files are written verbatim and never read back by this crate.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, warn};
use uuid::Uuid;

/// Which side of a call a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Request,
    Response,
}

impl Payload {
    fn suffix(self) -> &'static str {
        match self {
            Payload::Request => "request",
            Payload::Response => "response",
        }
    }
}

/// Writes payloads into a directory.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `content` to a new uniquely named file and returns its path.
    pub fn write(&self, payload: Payload, content: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = format!(
            "{}-{}-{}.xml",
            Local::now().format("%Y%m%d-%H%M%S"),
            Uuid::new_v4(),
            payload.suffix()
        );
        let path = self.dir.join(name);
        fs::write(&path, content)?;
        debug!("Saved QBXML {} to {}", payload.suffix(), path.display());
        Ok(path)
    }

    /// Like [`write`](Self::write) but only logs failures; a failed dump never fails a call.
    pub fn save(&self, payload: Payload, content: &str) -> Option<PathBuf> {
        match self.write(payload, content) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Could not save QBXML {} in {}: {}", payload.suffix(), self.dir.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_names_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("qbxml"));

        let request = diagnostics.write(Payload::Request, "<QBXML/>").unwrap();
        let response = diagnostics.write(Payload::Response, "<QBXML></QBXML>").unwrap();

        let name = request.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("-request.xml"));
        // YYYYmmdd-HHMMSS-<36 char uuid>-request.xml
        assert_eq!(name.len(), 15 + 1 + 36 + "-request.xml".len());
        assert!(response.to_str().unwrap().ends_with("-response.xml"));
        assert_eq!(fs::read_to_string(&request).unwrap(), "<QBXML/>");
        assert_ne!(request, response);
    }

    #[test]
    fn test_save_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();

        let diagnostics = Diagnostics::new(&blocker);
        assert!(diagnostics.save(Payload::Request, "<QBXML/>").is_none());
    }
}
