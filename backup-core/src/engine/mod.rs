//! Backup engine - captures full, incremental and differential snapshots.
//!
//! Each call runs `in_progress -> completed | completed_with_warnings | failed`:
//! - Copy the selected source files into `root/<type>/<id>/`
//! - Inventory the copied output (not the source)
//! - Seal the snapshot with a manifest
//! - Append the record to history and save it
//!
//! Failures never escape as `Err`; they end up in the record, and the record
//! is persisted either way.

use crate::config::Config;
use crate::events::{self, EventSink, LifecycleEvent};
use crate::fs::metadata::{copy_preserving, epoch_seconds};
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::history::{BackupRecord, BackupStatus, BackupType, FileEntry, HistoryStore};
use crate::integrity::manifest::MANIFEST_FILE_NAME;
use crate::integrity::IntegrityChecker;
use crate::layout::BackupLayout;
use crate::utils::errors::{BackupError, Result};
use crate::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One line of the backup summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummaryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub files: usize,
    pub size_mb: f64,
    pub status: BackupStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummary {
    pub total_backups: usize,
    pub total_size_bytes: u64,
    /// Newest first
    pub backups: Vec<BackupSummaryEntry>,
}

/// What a successful copy phase produced.
struct CaptureResult {
    files: BTreeMap<String, FileEntry>,
    size_bytes: u64,
    vanished: Vec<String>,
}

pub struct BackupEngine {
    layout: BackupLayout,
    history: HistoryStore,
    integrity: IntegrityChecker,
    events: Arc<dyn EventSink>,
}

impl BackupEngine {
    /// Open the backup root, creating its directory layout if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let layout = BackupLayout::new(root);
        layout.ensure()?;
        let history = HistoryStore::open(layout.history_path());

        Ok(Self {
            layout,
            history,
            integrity: IntegrityChecker::default(),
            events: events::noop(),
        })
    }

    /// Open the configured backup root with the configured hash settings.
    pub fn from_config(config: &Config) -> Result<Self> {
        let integrity = IntegrityChecker::new(config.integrity.algorithm)
            .with_chunk_size(config.integrity.chunk_size);
        Ok(Self::new(config.storage.backup_root.clone())?.with_integrity(integrity))
    }

    pub fn with_integrity(mut self, integrity: IntegrityChecker) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.integrity = self.integrity.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn integrity(&self) -> &IntegrityChecker {
        &self.integrity
    }

    /// Copy every file under `source`.
    pub fn full_backup(&mut self, source: &Path, backup_id: Option<&str>) -> Outcome<BackupRecord> {
        self.capture(BackupType::Full, source, backup_id)
    }

    /// Copy files modified after the newest completed backup of any type.
    pub fn incremental_backup(&mut self, source: &Path, backup_id: Option<&str>) -> Outcome<BackupRecord> {
        self.capture(BackupType::Incremental, source, backup_id)
    }

    /// Copy files modified after the newest completed full backup, so each
    /// differential is cumulative since that full.
    pub fn differential_backup(&mut self, source: &Path, backup_id: Option<&str>) -> Outcome<BackupRecord> {
        self.capture(BackupType::Differential, source, backup_id)
    }

    fn capture(&mut self, backup_type: BackupType, source: &Path, backup_id: Option<&str>) -> Outcome<BackupRecord> {
        let start_time = Instant::now();
        let backup_id = backup_id
            .map(str::to_string)
            .unwrap_or_else(|| default_backup_id(backup_type, Utc::now()));
        let destination = self.layout.snapshot_dir(backup_type, &backup_id);
        let mut record = BackupRecord::started(&backup_id, backup_type, source);

        let baseline = match backup_type {
            BackupType::Full => None,
            BackupType::Incremental => Some(self.history.last_backup_time(record.timestamp)),
            BackupType::Differential => Some(self.history.last_full_backup_time(record.timestamp)),
        };

        info!(
            backup_id = %backup_id,
            backup_type = %backup_type,
            source = %source.display(),
            baseline = ?baseline,
            "Starting backup"
        );
        self.events.emit(&LifecycleEvent::BackupStarted {
            backup_id: backup_id.clone(),
            backup_type: backup_type.to_string(),
            source: source.display().to_string(),
            destination: destination.display().to_string(),
        });

        // An id that is not a single path component would resolve outside its
        // own snapshot directory, so nothing is touched on disk.
        let captured = if BackupLayout::is_valid_id(&backup_id) {
            self.copy_snapshot(source, &destination, baseline)
        } else {
            Err(BackupError::InvalidId(backup_id.clone()))
        };

        match captured {
            Ok(captured) => {
                record.file_count = captured.files.len();
                record.size_bytes = captured.size_bytes;
                record.files = captured.files;
                if captured.vanished.is_empty() {
                    record.status = BackupStatus::Completed;
                } else {
                    warn!(
                        backup_id = %backup_id,
                        skipped = captured.vanished.len(),
                        "Source files disappeared during capture"
                    );
                    record.status = BackupStatus::CompletedWithWarnings;
                    record.error = Some(format!(
                        "{} source file(s) vanished during capture: {}",
                        captured.vanished.len(),
                        captured.vanished.join(", ")
                    ));
                }
            }
            Err(e) => {
                error!(backup_id = %backup_id, error = %e, "Backup failed");
                record.status = BackupStatus::Failed;
                record.error = Some(e.to_string());
            }
        }

        record.duration_seconds = start_time.elapsed().as_secs_f64();

        if record.status == BackupStatus::Failed {
            self.events.emit(&LifecycleEvent::BackupFailed {
                backup_id: backup_id.clone(),
                backup_type: backup_type.to_string(),
                error: record.error.clone().unwrap_or_default(),
            });
        } else {
            info!(
                backup_id = %backup_id,
                status = %record.status,
                files = record.file_count,
                bytes = record.size_bytes,
                duration = %format!("{:.2}s", record.duration_seconds),
                "Backup finished"
            );
            self.events.emit(&LifecycleEvent::BackupCompleted {
                backup_id: backup_id.clone(),
                backup_type: backup_type.to_string(),
                file_count: record.file_count,
                size_bytes: record.size_bytes,
                duration_seconds: record.duration_seconds,
            });
        }

        self.history.append(record.clone());
        if let Err(e) = self.history.save() {
            error!(backup_id = %backup_id, error = %e, "Failed to save backup history");
        }

        Outcome::new(record.status != BackupStatus::Failed, record)
    }

    /// Copy the selected files, inventory the copy and seal it with a manifest.
    /// A file that vanishes between the walk and its copy is skipped and
    /// reported; any other error aborts the capture.
    fn copy_snapshot(
        &self,
        source: &Path,
        destination: &Path,
        baseline: Option<DateTime<Utc>>,
    ) -> Result<CaptureResult> {
        if !source.is_dir() {
            return Err(BackupError::NotFound(format!("source directory {}", source.display())));
        }

        if destination.exists() {
            warn!(path = %destination.display(), "Replacing existing snapshot directory");
            std::fs::remove_dir_all(destination)?;
        }
        std::fs::create_dir_all(destination)?;

        let mut vanished = Vec::new();
        for file in walk_directory(source, &WalkOptions::default())? {
            if let Some(baseline) = baseline {
                if DateTime::<Utc>::from(file.modified) <= baseline {
                    continue;
                }
            }

            let key = file.relative_key();
            if file.path.file_name().is_some_and(|name| name == MANIFEST_FILE_NAME) {
                warn!(path = %file.path.display(), "Skipping source file with reserved manifest name");
                continue;
            }

            match copy_preserving(&file.path, &destination.join(&file.relative_path)) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %file.path.display(), "Source file vanished before copy");
                    vanished.push(key);
                }
                Err(e) => {
                    error!(path = %file.path.display(), error = %e, "Failed to copy file");
                    return Err(e.into());
                }
            }
        }

        let mut files = BTreeMap::new();
        let mut size_bytes = 0u64;
        for copied in walk_directory(destination, &WalkOptions::excluding(MANIFEST_FILE_NAME))? {
            size_bytes += copied.size;
            files.insert(
                copied.relative_key(),
                FileEntry {
                    modified: epoch_seconds(copied.modified),
                    size: copied.size,
                },
            );
        }

        self.integrity.build_manifest(destination)?;

        Ok(CaptureResult { files, size_bytes, vanished })
    }

    /// Every recorded attempt, newest first, with sizes in MiB.
    pub fn summary(&self) -> BackupSummary {
        let mut backups: Vec<BackupSummaryEntry> = self
            .history
            .records()
            .iter()
            .map(|r| BackupSummaryEntry {
                id: r.id.clone(),
                backup_type: r.backup_type,
                files: r.file_count,
                size_mb: r.size_bytes as f64 / BYTES_PER_MB,
                status: r.status,
                timestamp: r.timestamp,
            })
            .collect();
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        BackupSummary {
            total_backups: backups.len(),
            total_size_bytes: self.history.records().iter().map(|r| r.size_bytes).sum(),
            backups,
        }
    }

    /// Remove every snapshot and the history, leaving an empty layout.
    pub fn purge_all(&mut self) -> Result<()> {
        for backup_type in BackupType::ALL {
            let dir = self.layout.type_dir(backup_type);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
                info!(path = %dir.display(), "Deleted backup folder");
            }
        }

        let metadata_dir = self.layout.metadata_dir();
        if metadata_dir.exists() {
            std::fs::remove_dir_all(&metadata_dir)?;
        }

        self.history.clear();
        self.layout.ensure()?;
        info!(root = %self.layout.root().display(), "All backups purged");
        Ok(())
    }
}

/// `{type}_{yyyymmdd_hhmmss}` in UTC.
pub fn default_backup_id(backup_type: BackupType, at: DateTime<Utc>) -> String {
    format!("{}_{}", backup_type, at.format("%Y%m%d_%H%M%S"))
}
