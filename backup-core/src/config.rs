//! Configuration management for the backup toolkit.
//!
//! Loads configuration from a TOML file; every section has serde defaults so a
//! partial file (or no file at all) yields a usable configuration.

use crate::history::BackupType;
use crate::integrity::HashAlgorithm;
use crate::retention::RetentionPolicy;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the backup tree (`full/`, `incremental/`, `differential/`, `.metadata/`)
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Hash algorithm used for manifests (sha256, sha512)
    #[serde(default)]
    pub algorithm: HashAlgorithm,

    /// Read buffer size in bytes when hashing
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Copy attempts per file before the error is recorded
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output (stdout, stderr)
    #[serde(default = "default_log_output")]
    pub output: String,
}

/// A daily backup run for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub source: PathBuf,
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_chunk_size() -> usize {
    8192
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stderr".to_string()
}

fn default_hour() -> u32 {
    2
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RestoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.integrity.chunk_size == 0 {
            return Err(BackupError::Config("integrity.chunk_size must be positive".into()));
        }
        if self.restore.retry_attempts == 0 {
            return Err(BackupError::Config("restore.retry_attempts must be at least 1".into()));
        }
        for entry in &self.schedule {
            if entry.hour > 23 || entry.minute > 59 {
                return Err(BackupError::Config(format!(
                    "invalid schedule time {:02}:{:02} for {}",
                    entry.hour,
                    entry.minute,
                    entry.source.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.integrity.algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.integrity.chunk_size, 8192);
        assert_eq!(config.restore.retry_attempts, 3);
        assert_eq!(config.retention.full_backup_days, 7);
        assert_eq!(config.retention.incremental_backup_days, 1);
        assert_eq!(config.retention.differential_backup_days, 3);
        assert!(config.schedule.is_empty());
    }

    #[test]
    fn test_partial_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("backup.toml");
        std::fs::write(
            &path,
            r#"
[storage]
backup_root = "/srv/backups"

[integrity]
algorithm = "sha512"

[retention]
full_backup_days = 30

[[schedule]]
type = "incremental"
source = "/home/data"
hour = 12
"#,
        )?;

        let config = Config::from_file(&path)?;
        assert_eq!(config.storage.backup_root, PathBuf::from("/srv/backups"));
        assert_eq!(config.integrity.algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.retention.full_backup_days, 30);
        assert_eq!(config.retention.incremental_backup_days, 1);
        assert_eq!(config.schedule.len(), 1);
        assert_eq!(config.schedule[0].backup_type, BackupType::Incremental);
        assert_eq!(config.schedule[0].minute, 0);
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_algorithm() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("backup.toml");
        std::fs::write(&path, "[integrity]\nalgorithm = \"crc32\"\n")?;

        assert!(matches!(Config::from_file(&path), Err(BackupError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_schedule_time() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("backup.toml");
        std::fs::write(
            &path,
            "[[schedule]]\ntype = \"full\"\nsource = \"/data\"\nhour = 25\n",
        )?;

        assert!(matches!(Config::from_file(&path), Err(BackupError::Config(_))));
        Ok(())
    }
}
