//! Manifest types for snapshot integrity verification.
//!
//! A manifest records every file in a snapshot with its content hash, size and
//! mtime. It is written once, right after the snapshot's files, as
//! `MANIFEST.json` in the snapshot directory.

use super::HashAlgorithm;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Reserved file name; never copied on restore and never counted as snapshot content.
pub const MANIFEST_FILE_NAME: &str = "MANIFEST.json";

/// Sealed hash inventory for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub algorithm: HashAlgorithm,
    pub created: DateTime<Utc>,
    pub files: BTreeMap<String, ManifestEntry>,
}

/// Metadata for a single file in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: f64,
}

impl Manifest {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            created: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|e| e.size).sum()
    }

    /// Load a manifest document. A missing file is `NotFound`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(format!("manifest {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_document_shape() {
        let mut manifest = Manifest::new(HashAlgorithm::Sha256);
        manifest.files.insert(
            "docs/a.txt".to_string(),
            ManifestEntry { hash: "ab".repeat(32), size: 3, modified: 1_700_000_000.5 },
        );

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["algorithm"], "sha256");
        assert!(json["created"].as_str().is_some());
        assert_eq!(json["files"]["docs/a.txt"]["size"], 3);
        assert_eq!(manifest.total_bytes(), 3);
    }

    #[test]
    fn test_load_missing_is_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        let result = Manifest::load(&dir.path().join(MANIFEST_FILE_NAME));
        assert!(matches!(result, Err(BackupError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_load_garbage_is_serialization_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(MANIFEST_FILE_NAME);
        std::fs::write(&path, "{ not json")?;
        assert!(matches!(Manifest::load(&path), Err(BackupError::Serialization(_))));
        Ok(())
    }
}
