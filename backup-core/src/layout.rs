//! On-disk layout of a backup root.
//!
//! ```text
//! root/
//!   full/<backup_id>/...
//!   incremental/<backup_id>/...
//!   differential/<backup_id>/...
//!   .metadata/backup_history.json
//! ```

use crate::history::BackupType;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const METADATA_DIR: &str = ".metadata";
pub const HISTORY_FILE: &str = "backup_history.json";

/// A snapshot directory found on disk.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    pub id: String,
    pub backup_type: BackupType,
    pub path: PathBuf,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BackupLayout {
    root: PathBuf,
}

impl BackupLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the metadata and per-type directories if missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.metadata_dir())?;
        for backup_type in BackupType::ALL {
            fs::create_dir_all(self.type_dir(backup_type))?;
        }
        Ok(())
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn history_path(&self) -> PathBuf {
        self.metadata_dir().join(HISTORY_FILE)
    }

    pub fn type_dir(&self, backup_type: BackupType) -> PathBuf {
        self.root.join(backup_type.as_str())
    }

    pub fn snapshot_dir(&self, backup_type: BackupType, id: &str) -> PathBuf {
        self.type_dir(backup_type).join(id)
    }

    /// An id must name exactly one directory inside a type directory.
    pub fn is_valid_id(id: &str) -> bool {
        !(id.is_empty() || id.contains(['/', '\\']) || id == "." || id == "..")
    }

    /// Resolve a backup id by probing full, incremental, then differential.
    pub fn find_snapshot(&self, id: &str) -> Option<(BackupType, PathBuf)> {
        if !Self::is_valid_id(id) {
            return None;
        }

        BackupType::ALL.into_iter().find_map(|backup_type| {
            let path = self.snapshot_dir(backup_type, id);
            path.is_dir().then_some((backup_type, path))
        })
    }

    /// Snapshot directories of one type, ordered by creation time then id.
    /// A missing type directory yields an empty list.
    pub fn list_snapshots(&self, backup_type: BackupType) -> std::io::Result<Vec<SnapshotDir>> {
        let type_dir = self.type_dir(backup_type);
        let entries = match fs::read_dir(&type_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            snapshots.push(SnapshotDir {
                id: entry.file_name().to_string_lossy().into_owned(),
                backup_type,
                path: entry.path(),
                created: creation_time(&metadata).into(),
            });
        }

        snapshots.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    /// Every snapshot directory across all types.
    pub fn all_snapshots(&self) -> std::io::Result<Vec<SnapshotDir>> {
        let mut all = Vec::new();
        for backup_type in BackupType::ALL {
            all.extend(self.list_snapshots(backup_type)?);
        }
        Ok(all)
    }
}

/// Filesystem creation (birth) time, or the modification time on filesystems
/// that do not record one.
pub fn creation_time(metadata: &fs::Metadata) -> SystemTime {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
