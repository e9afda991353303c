//! Disaster recovery - restores snapshots and reports RPO/RTO.
//!
//! The manager only reads the backup root. History is re-read on every call
//! so it always sees what the engine last saved; snapshot lookups go to disk,
//! so a history record whose directory was pruned resolves as not found.

use crate::config::{Config, RestoreConfig};
use crate::events::{self, EventSink, LifecycleEvent};
use crate::fs::metadata::copy_preserving;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::history::{BackupRecord, BackupStatus, BackupType, HistoryStore};
use crate::integrity::manifest::{Manifest, MANIFEST_FILE_NAME};
use crate::integrity::{IntegrityChecker, VerificationReport};
use crate::layout::BackupLayout;
use crate::utils::errors::{BackupError, Result};
use crate::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Completed records averaged for the RTO estimate
const RTO_WINDOW: usize = 5;

const DRILL_DIR: &str = ".test_recovery";

/// Result of one restore call. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub recovery_id: String,
    /// Restored snapshot; the full snapshot for chain restores
    pub backup_id: String,
    /// Increments applied after the full, in the order given
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incremental_backup_ids: Vec<String>,
    /// Directory actually written, which differs from the requested one when
    /// the requested one could not be cleared
    pub destination: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,
    pub file_count: usize,
    pub duration_seconds: f64,
    pub rto_seconds: f64,
    /// Non-fatal per-file problems
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecoveryRecord {
    fn started(recovery_id: &str, backup_id: &str, destination: &Path) -> Self {
        Self {
            recovery_id: recovery_id.to_string(),
            backup_id: backup_id.to_string(),
            incremental_backup_ids: Vec::new(),
            destination: destination.to_path_buf(),
            timestamp: Utc::now(),
            status: BackupStatus::InProgress,
            file_count: 0,
            duration_seconds: 0.0,
            rto_seconds: 0.0,
            errors: Vec::new(),
            verification: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryMetrics {
    pub rto_minutes: f64,
    pub rpo_minutes: f64,
    pub latest_backup_age_minutes: f64,
    pub backup_frequency_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<MetricsAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsAnalysis {
    pub total_completed_backups: usize,
    pub latest_backup_type: BackupType,
    pub latest_backup_id: String,
    pub latest_backup_files: usize,
    pub latest_backup_size_mb: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrillStatus {
    NotRun,
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillIntegrity {
    pub valid: bool,
    pub verified_files: usize,
    pub corrupted_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillReport {
    pub test_id: String,
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: DrillStatus,
    pub recovery_successful: bool,
    pub file_count: usize,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_check: Option<DrillIntegrity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Listing entry for a completed backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableBackup {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub timestamp: DateTime<Utc>,
    pub files: usize,
    pub size_mb: f64,
    pub source: PathBuf,
    /// False when the snapshot directory has been pruned
    pub on_disk: bool,
}

pub struct DisasterRecoveryManager {
    layout: BackupLayout,
    integrity: IntegrityChecker,
    retry: RestoreConfig,
    events: Arc<dyn EventSink>,
}

impl DisasterRecoveryManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: BackupLayout::new(root),
            integrity: IntegrityChecker::default(),
            retry: RestoreConfig::default(),
            events: events::noop(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let integrity = IntegrityChecker::new(config.integrity.algorithm)
            .with_chunk_size(config.integrity.chunk_size);
        Self::new(config.storage.backup_root.clone())
            .with_integrity(integrity)
            .with_retry(config.restore.clone())
    }

    pub fn with_integrity(mut self, integrity: IntegrityChecker) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_retry(mut self, retry: RestoreConfig) -> Self {
        self.retry = retry;
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

    fn history(&self) -> Vec<BackupRecord> {
        HistoryStore::load(&self.layout.history_path()).backups
    }

    /// Snapshot directory for `backup_id`, probing full, incremental, then
    /// differential.
    pub fn find_path(&self, backup_id: &str) -> Result<PathBuf> {
        self.layout
            .find_snapshot(backup_id)
            .map(|(_, path)| path)
            .ok_or_else(|| BackupError::NotFound(format!("backup {}", backup_id)))
    }

    /// Restore one snapshot into `destination`.
    pub fn restore(&self, backup_id: &str, destination: &Path, recovery_id: Option<&str>) -> Outcome<RecoveryRecord> {
        self.restore_with_cause(backup_id, destination, recovery_id).0
    }

    /// `restore`, also handing back the error that failed it.
    fn restore_with_cause(
        &self,
        backup_id: &str,
        destination: &Path,
        recovery_id: Option<&str>,
    ) -> (Outcome<RecoveryRecord>, Option<BackupError>) {
        let start_time = Instant::now();
        let recovery_id = recovery_id
            .map(str::to_string)
            .unwrap_or_else(|| default_recovery_id("recovery", Utc::now()));
        let mut record = RecoveryRecord::started(&recovery_id, backup_id, destination);

        info!(recovery_id = %recovery_id, backup_id = %backup_id, destination = %destination.display(), "Starting recovery");
        self.events.emit(&LifecycleEvent::RecoveryStarted {
            recovery_id: recovery_id.clone(),
            backup_id: backup_id.to_string(),
            destination: destination.display().to_string(),
        });

        let cause = self.restore_snapshot(backup_id, destination, &mut record).err();
        if let Some(e) = &cause {
            record.status = BackupStatus::Failed;
            record.error = Some(e.to_string());
        }

        (self.finish(&mut record, start_time), cause)
    }

    fn restore_snapshot(&self, backup_id: &str, destination: &Path, record: &mut RecoveryRecord) -> Result<()> {
        let snapshot = self.find_path(backup_id)?;
        let destination = self.prepare_destination(destination, &record.recovery_id)?;
        record.destination = destination.clone();

        for file in walk_directory(&snapshot, &WalkOptions::excluding(MANIFEST_FILE_NAME))? {
            let target = destination.join(&file.relative_path);
            match self.copy_with_retry(&file.path, &target) {
                Ok(_) => record.file_count += 1,
                Err(e) => {
                    warn!(file = %file.relative_key(), error = %e, "Skipping file after failed copy");
                    record.errors.push(format!("{}: {}", file.relative_key(), e));
                }
            }
        }

        if record.file_count == 0 {
            return Err(BackupError::EmptySnapshot(format!("no files restored from backup {}", backup_id)));
        }

        record.status = BackupStatus::Completed;
        match Manifest::load(&snapshot.join(MANIFEST_FILE_NAME)) {
            Ok(manifest) => {
                let report = self.integrity.verify(&destination, &manifest);
                if !report.valid {
                    warn!(
                        backup_id = %backup_id,
                        corrupted = report.corrupted_files.len(),
                        missing = report.missing_files.len(),
                        "Restored files failed verification"
                    );
                    let failure = BackupError::Integrity(format!(
                        "{} corrupted, {} missing after restore of {}",
                        report.corrupted_files.len(),
                        report.missing_files.len(),
                        backup_id
                    ));
                    record.errors.push(failure.to_string());
                    record.status = BackupStatus::CompletedWithWarnings;
                }
                record.verification = Some(report);
            }
            Err(BackupError::NotFound(_)) => {
                debug!(backup_id = %backup_id, "No manifest, skipping verification");
            }
            Err(e) => {
                warn!(backup_id = %backup_id, error = %e, "Manifest unreadable, skipping verification");
                record.errors.push(format!("{}: {}", MANIFEST_FILE_NAME, e));
                record.status = BackupStatus::CompletedWithWarnings;
            }
        }

        Ok(())
    }

    /// Restore a full snapshot, then copy each increment over it in the order
    /// given. Same-path files from later increments overwrite earlier ones;
    /// the order is not checked against creation times.
    pub fn restore_chain(
        &self,
        full_backup_id: &str,
        incremental_backup_ids: &[String],
        destination: &Path,
        recovery_id: Option<&str>,
    ) -> Outcome<RecoveryRecord> {
        let start_time = Instant::now();
        let recovery_id = recovery_id
            .map(str::to_string)
            .unwrap_or_else(|| default_recovery_id("recovery_chain", Utc::now()));
        let mut record = RecoveryRecord::started(&recovery_id, full_backup_id, destination);
        record.incremental_backup_ids = incremental_backup_ids.to_vec();

        info!(
            recovery_id = %recovery_id,
            full_backup_id = %full_backup_id,
            increments = incremental_backup_ids.len(),
            "Starting chain recovery"
        );
        self.events.emit(&LifecycleEvent::RecoveryStarted {
            recovery_id: recovery_id.clone(),
            backup_id: full_backup_id.to_string(),
            destination: destination.display().to_string(),
        });

        if let Err(e) = self.apply_chain(full_backup_id, incremental_backup_ids, destination, &mut record) {
            record.status = BackupStatus::Failed;
            record.error = Some(e.to_string());
        }

        self.finish(&mut record, start_time)
    }

    fn apply_chain(
        &self,
        full_backup_id: &str,
        incremental_backup_ids: &[String],
        destination: &Path,
        record: &mut RecoveryRecord,
    ) -> Result<()> {
        let full_recovery_id = format!("{}_full", record.recovery_id);
        let (base, cause) = self.restore_with_cause(full_backup_id, destination, Some(full_recovery_id.as_str()));
        if let Some(e) = cause {
            return Err(e);
        }

        let destination = base.record.destination;
        record.destination = destination.clone();
        record.file_count = base.record.file_count;
        record.errors = base.record.errors;
        let mut warnings = base.record.status == BackupStatus::CompletedWithWarnings;

        for increment_id in incremental_backup_ids {
            let snapshot = self.find_path(increment_id)?;
            for file in walk_directory(&snapshot, &WalkOptions::excluding(MANIFEST_FILE_NAME))? {
                match self.copy_with_retry(&file.path, &destination.join(&file.relative_path)) {
                    Ok(_) => record.file_count += 1,
                    Err(e) => {
                        warn!(backup_id = %increment_id, file = %file.relative_key(), error = %e, "Skipping file after failed copy");
                        record.errors.push(format!("{}/{}: {}", increment_id, file.relative_key(), e));
                        warnings = true;
                    }
                }
            }
            debug!(backup_id = %increment_id, "Increment applied");
        }

        record.status = if warnings {
            BackupStatus::CompletedWithWarnings
        } else {
            BackupStatus::Completed
        };
        Ok(())
    }

    fn finish(&self, record: &mut RecoveryRecord, start_time: Instant) -> Outcome<RecoveryRecord> {
        record.duration_seconds = start_time.elapsed().as_secs_f64();
        record.rto_seconds = record.duration_seconds;

        if record.status == BackupStatus::Failed {
            let message = record.error.clone().unwrap_or_default();
            error!(recovery_id = %record.recovery_id, error = %message, "Recovery failed");
            self.events.emit(&LifecycleEvent::RecoveryFailed {
                recovery_id: record.recovery_id.clone(),
                error: message,
            });
        } else {
            info!(
                recovery_id = %record.recovery_id,
                status = %record.status,
                files = record.file_count,
                rto = %format!("{:.2}s", record.rto_seconds),
                "Recovery finished"
            );
            self.events.emit(&LifecycleEvent::RecoveryCompleted {
                recovery_id: record.recovery_id.clone(),
                status: record.status.to_string(),
                file_count: record.file_count,
                duration_seconds: record.duration_seconds,
                rto_seconds: record.rto_seconds,
            });
        }

        Outcome::new(record.status != BackupStatus::Failed, record.clone())
    }

    /// Clear and recreate the destination. When it cannot be removed, fall
    /// back to `<destination>_<recovery_id>`.
    fn prepare_destination(&self, destination: &Path, recovery_id: &str) -> Result<PathBuf> {
        let mut target = destination.to_path_buf();
        if target.exists() {
            if let Err(e) = std::fs::remove_dir_all(&target) {
                let mut fallback = target.clone().into_os_string();
                fallback.push(format!("_{}", recovery_id));
                warn!(
                    destination = %target.display(),
                    fallback = %Path::new(&fallback).display(),
                    error = %e,
                    "Cannot clear destination, restoring alongside it"
                );
                target = PathBuf::from(fallback);
            }
        }
        std::fs::create_dir_all(&target)?;
        Ok(target)
    }

    fn copy_with_retry(&self, source: &Path, target: &Path) -> Result<u64> {
        let attempts = self.retry.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match copy_preserving(source, target) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < attempts => {
                    debug!(path = %source.display(), attempt, error = %e, "Copy failed, retrying");
                    std::thread::sleep(self.retry.retry_delay());
                    attempt += 1;
                }
                Err(e) => return Err(BackupError::Transient { attempts, source: e }),
            }
        }
    }

    /// RPO/RTO over completed history records.
    pub fn rpo_rto(&self) -> RecoveryMetrics {
        self.rpo_rto_at(Utc::now())
    }

    pub fn rpo_rto_at(&self, as_of: DateTime<Utc>) -> RecoveryMetrics {
        let history = self.history();
        let completed: Vec<&BackupRecord> = history.iter().filter(|r| r.is_completed()).collect();

        let Some(latest) = completed.last() else {
            return RecoveryMetrics::default();
        };

        let age_minutes = minutes_between(latest.timestamp, as_of);

        let durations: Vec<f64> = completed
            .iter()
            .rev()
            .take(RTO_WINDOW)
            .map(|r| r.duration_seconds)
            .filter(|d| *d > 0.0)
            .collect();
        let rto_minutes = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64 / 60.0
        };

        let backup_frequency_minutes = match completed.len() {
            0 | 1 => 0.0,
            n => minutes_between(completed[n - 2].timestamp, latest.timestamp),
        };

        RecoveryMetrics {
            rto_minutes,
            rpo_minutes: age_minutes,
            latest_backup_age_minutes: age_minutes,
            backup_frequency_minutes,
            analysis: Some(MetricsAnalysis {
                total_completed_backups: completed.len(),
                latest_backup_type: latest.backup_type,
                latest_backup_id: latest.id.clone(),
                latest_backup_files: latest.file_count,
                latest_backup_size_mb: latest.size_bytes as f64 / BYTES_PER_MB,
            }),
        }
    }

    /// Restore into a scratch directory, check it, then remove it.
    /// Defaults to `<root>/.test_recovery`.
    pub fn simulate_drill(&self, backup_id: &str, temp_dir: Option<&Path>) -> DrillReport {
        let now = Utc::now();
        let scratch = temp_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.root().join(DRILL_DIR));
        let mut report = DrillReport {
            test_id: default_recovery_id("test", now),
            backup_id: backup_id.to_string(),
            timestamp: now,
            status: DrillStatus::NotRun,
            recovery_successful: false,
            file_count: 0,
            duration_seconds: 0.0,
            integrity_check: None,
            error: None,
        };

        let outcome = self.restore(backup_id, &scratch, Some(report.test_id.as_str()));
        report.recovery_successful = outcome.ok;
        report.status = if outcome.ok { DrillStatus::Passed } else { DrillStatus::Failed };
        report.file_count = outcome.record.file_count;
        report.duration_seconds = outcome.record.duration_seconds;
        report.error = outcome.record.error.clone();
        report.integrity_check = outcome.record.verification.as_ref().map(|v| DrillIntegrity {
            valid: v.valid,
            verified_files: v.verified_files,
            corrupted_files: v.corrupted_files.len(),
        });

        for dir in [&scratch, &outcome.record.destination] {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    warn!(path = %dir.display(), error = %e, "Failed to remove drill directory");
                }
            }
        }

        info!(test_id = %report.test_id, backup_id = %backup_id, status = ?report.status, "Recovery drill finished");
        report
    }

    /// Completed backups from history. Records whose snapshot directory is
    /// gone are still listed, with `on_disk` false.
    pub fn list_available(&self) -> Vec<AvailableBackup> {
        self.history()
            .into_iter()
            .filter(BackupRecord::is_completed)
            .map(|r| AvailableBackup {
                on_disk: self.layout.find_snapshot(&r.id).is_some(),
                id: r.id,
                backup_type: r.backup_type,
                timestamp: r.timestamp,
                files: r.file_count,
                size_mb: r.size_bytes as f64 / BYTES_PER_MB,
                source: r.source,
            })
            .collect()
    }
}

/// Minutes from `earlier` to `later`, never negative.
fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let seconds = (later - earlier).num_milliseconds() as f64 / 1000.0;
    (seconds / 60.0).max(0.0)
}

fn default_recovery_id(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", prefix, at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BackupEngine;
    use crate::events::testing::RecordingSink;
    use chrono::Duration as ChronoDuration;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_file(path: &Path, content: &[u8], modified: SystemTime) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        fs::File::options().write(true).open(path)?.set_modified(modified)
    }

    fn hours_from_now(hours: i64) -> SystemTime {
        let offset = Duration::from_secs(hours.unsigned_abs() * 3600);
        if hours >= 0 {
            SystemTime::now() + offset
        } else {
            SystemTime::now() - offset
        }
    }

    struct Fixture {
        root: TempDir,
        source: TempDir,
        engine: BackupEngine,
    }

    fn fixture() -> Result<Fixture> {
        let root = TempDir::new()?;
        let source = TempDir::new()?;
        write_file(&source.path().join("a"), b"alpha", hours_from_now(-2))?;
        write_file(&source.path().join("b"), b"bravo", hours_from_now(-2))?;
        write_file(&source.path().join("nested/c"), b"charlie", hours_from_now(-2))?;
        let engine = BackupEngine::new(root.path())?;
        Ok(Fixture { root, source, engine })
    }

    #[test]
    fn test_restore_missing_backup_fails() -> Result<()> {
        let f = fixture()?;
        let sink = Arc::new(RecordingSink::default());
        let manager = DisasterRecoveryManager::new(f.root.path()).with_events(sink.clone());

        let outcome = manager.restore("does-not-exist", &f.root.path().join("out"), None);
        assert!(!outcome.ok);
        assert_eq!(outcome.record.status, BackupStatus::Failed);
        assert!(outcome.record.error.as_deref().unwrap_or_default().contains("does-not-exist"));
        assert!(matches!(sink.events().last(), Some(LifecycleEvent::RecoveryFailed { .. })));
        Ok(())
    }

    #[test]
    fn test_restore_round_trip_verifies() -> Result<()> {
        let mut f = fixture()?;
        assert!(f.engine.full_backup(f.source.path(), Some("full_1")).ok);
        let manager = DisasterRecoveryManager::new(f.root.path());
        let out = f.root.path().join("restored");
        write_file(&out.join("leftover"), b"stale", hours_from_now(-1))?;

        let outcome = manager.restore("full_1", &out, Some("r1"));
        assert!(outcome.ok);
        assert_eq!(outcome.record.status, BackupStatus::Completed);
        assert_eq!(outcome.record.file_count, 3);
        assert!(outcome.record.rto_seconds >= 0.0);
        assert!(!out.join("leftover").exists());
        assert!(!out.join(MANIFEST_FILE_NAME).exists());
        assert_eq!(fs::read(out.join("nested/c"))?, b"charlie");

        let manifest = Manifest::load(&f.root.path().join("full/full_1").join(MANIFEST_FILE_NAME))?;
        let report = manager.integrity.verify(&out, &manifest);
        assert_eq!(report.verified_files, report.total_files);
        Ok(())
    }

    #[test]
    fn test_corrupted_snapshot_restores_with_warnings() -> Result<()> {
        let mut f = fixture()?;
        f.engine.full_backup(f.source.path(), Some("full_1"));
        fs::write(f.root.path().join("full/full_1/a"), b"Alpha")?;
        let manager = DisasterRecoveryManager::new(f.root.path());

        let outcome = manager.restore("full_1", &f.root.path().join("out"), None);
        assert!(outcome.ok);
        assert_eq!(outcome.record.status, BackupStatus::CompletedWithWarnings);
        assert!(outcome.record.errors.iter().any(|e| e.starts_with("Integrity error: 1 corrupted")));
        let verification = outcome.record.verification.expect("manifest present");
        assert_eq!(verification.corrupted_files[0].file, "a");
        Ok(())
    }

    #[test]
    fn test_restore_without_manifest_completes() -> Result<()> {
        let mut f = fixture()?;
        f.engine.full_backup(f.source.path(), Some("full_1"));
        fs::remove_file(f.root.path().join("full/full_1").join(MANIFEST_FILE_NAME))?;
        let manager = DisasterRecoveryManager::new(f.root.path());

        let outcome = manager.restore("full_1", &f.root.path().join("out"), None);
        assert_eq!(outcome.record.status, BackupStatus::Completed);
        assert!(outcome.record.verification.is_none());
        Ok(())
    }

    #[test]
    fn test_restore_empty_snapshot_fails() -> Result<()> {
        let mut f = fixture()?;
        f.engine.full_backup(f.source.path(), Some("full_1"));
        let inc = f.engine.incremental_backup(f.source.path(), Some("inc_empty"));
        assert_eq!(inc.record.file_count, 0);
        let manager = DisasterRecoveryManager::new(f.root.path());

        let outcome = manager.restore("inc_empty", &f.root.path().join("out"), None);
        assert!(!outcome.ok);
        assert_eq!(outcome.record.status, BackupStatus::Failed);

        let mut record = RecoveryRecord::started("r_empty", "inc_empty", &f.root.path().join("out"));
        let result = manager.restore_snapshot("inc_empty", &f.root.path().join("out"), &mut record);
        assert!(matches!(result, Err(BackupError::EmptySnapshot(_))));
        Ok(())
    }

    #[test]
    fn test_restore_falls_back_when_destination_is_a_file() -> Result<()> {
        let mut f = fixture()?;
        assert!(f.engine.full_backup(f.source.path(), Some("full_1")).ok);
        let manager = DisasterRecoveryManager::new(f.root.path());
        let blocked = f.root.path().join("blocked");
        fs::write(&blocked, b"not a directory")?;

        let outcome = manager.restore("full_1", &blocked, Some("r1"));
        let fallback = f.root.path().join("blocked_r1");
        assert!(outcome.ok);
        assert_eq!(outcome.record.status, BackupStatus::Completed);
        assert_eq!(outcome.record.destination, fallback);
        assert_eq!(outcome.record.file_count, 3);
        assert_eq!(fs::read(fallback.join("nested/c"))?, b"charlie");
        assert_eq!(fs::read(&blocked)?, b"not a directory");
        Ok(())
    }

    #[test]
    fn test_drill_removes_fallback_directory() -> Result<()> {
        let mut f = fixture()?;
        f.engine.full_backup(f.source.path(), Some("full_1"));
        let manager = DisasterRecoveryManager::new(f.root.path());
        let scratch = f.root.path().join("scratch");
        fs::write(&scratch, b"occupied")?;

        let report = manager.simulate_drill("full_1", Some(&scratch));
        assert_eq!(report.status, DrillStatus::Passed);
        assert_eq!(report.file_count, 3);

        let fallback = f.root.path().join(format!("scratch_{}", report.test_id));
        assert!(!fallback.exists());
        assert!(scratch.is_file());
        Ok(())
    }

    #[test]
    fn test_chain_restore_last_writer_wins() -> Result<()> {
        let mut f = fixture()?;
        let src = f.source.path().to_path_buf();
        f.engine.full_backup(&src, Some("full_1"));

        write_file(&src.join("b"), b"bravo v2", hours_from_now(1))?;
        write_file(&src.join("a"), b"alpha v2", hours_from_now(1))?;
        assert_eq!(f.engine.incremental_backup(&src, Some("inc_1")).record.file_count, 2);

        write_file(&src.join("b"), b"bravo v3", hours_from_now(2))?;
        assert_eq!(f.engine.incremental_backup(&src, Some("inc_2")).record.file_count, 2);

        let manager = DisasterRecoveryManager::new(f.root.path());
        let out = f.root.path().join("chain");
        let increments = vec!["inc_1".to_string(), "inc_2".to_string()];

        let outcome = manager.restore_chain("full_1", &increments, &out, Some("chain_1"));
        assert!(outcome.ok);
        assert_eq!(outcome.record.status, BackupStatus::Completed);
        assert_eq!(fs::read(out.join("b"))?, b"bravo v3");
        assert_eq!(fs::read(out.join("a"))?, b"alpha v2");
        assert_eq!(fs::read(out.join("nested/c"))?, b"charlie");
        assert_eq!(outcome.record.file_count, 3 + 2 + 2);
        assert_eq!(outcome.record.incremental_backup_ids, increments);

        let reversed = vec!["inc_2".to_string(), "inc_1".to_string()];
        manager.restore_chain("full_1", &reversed, &out, None);
        assert_eq!(fs::read(out.join("b"))?, b"bravo v2");
        Ok(())
    }

    #[test]
    fn test_chain_with_missing_increment_fails() -> Result<()> {
        let mut f = fixture()?;
        f.engine.full_backup(f.source.path(), Some("full_1"));
        let manager = DisasterRecoveryManager::new(f.root.path());

        let outcome = manager.restore_chain("full_1", &["inc_gone".to_string()], &f.root.path().join("out"), None);
        assert!(!outcome.ok);
        assert!(outcome.record.error.as_deref().unwrap_or_default().contains("inc_gone"));
        Ok(())
    }

    #[test]
    fn test_chain_keeps_cause_of_failed_full_restore() -> Result<()> {
        let f = fixture()?;
        let manager = DisasterRecoveryManager::new(f.root.path());
        let out = f.root.path().join("out");

        let outcome = manager.restore_chain("full_gone", &[], &out, Some("c1"));
        assert!(!outcome.ok);
        assert!(outcome.record.error.as_deref().unwrap_or_default().starts_with("Not found"));

        let mut record = RecoveryRecord::started("c2", "full_gone", &out);
        let result = manager.apply_chain("full_gone", &[], &out, &mut record);
        assert!(matches!(result, Err(BackupError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_copy_with_retry_gives_up() -> Result<()> {
        let root = TempDir::new()?;
        let manager = DisasterRecoveryManager::new(root.path()).with_retry(RestoreConfig {
            retry_attempts: 3,
            retry_delay_ms: 1,
        });

        let result = manager.copy_with_retry(&root.path().join("missing"), &root.path().join("out/missing"));
        assert!(matches!(result, Err(BackupError::Transient { attempts: 3, .. })));
        Ok(())
    }

    #[test]
    fn test_rpo_rto_without_backups_is_zero() -> Result<()> {
        let f = fixture()?;
        let manager = DisasterRecoveryManager::new(f.root.path());
        assert_eq!(manager.rpo_rto(), RecoveryMetrics::default());
        Ok(())
    }

    #[test]
    fn test_rpo_rto_single_and_pair() -> Result<()> {
        let mut f = fixture()?;
        let first = f.engine.full_backup(f.source.path(), Some("full_1")).record;
        let manager = DisasterRecoveryManager::new(f.root.path());

        let metrics = manager.rpo_rto_at(first.timestamp + ChronoDuration::minutes(30));
        assert!((metrics.rpo_minutes - 30.0).abs() < 0.01);
        assert_eq!(metrics.backup_frequency_minutes, 0.0);
        assert!(metrics.rto_minutes >= 0.0);
        let analysis = metrics.analysis.expect("one completed backup");
        assert_eq!(analysis.total_completed_backups, 1);
        assert_eq!(analysis.latest_backup_id, "full_1");
        assert_eq!(analysis.latest_backup_files, 3);

        std::thread::sleep(Duration::from_millis(20));
        let second = f.engine.incremental_backup(f.source.path(), Some("inc_1")).record;
        let metrics = manager.rpo_rto_at(second.timestamp);
        assert_eq!(metrics.rpo_minutes, 0.0);
        assert!(metrics.backup_frequency_minutes > 0.0);

        // Clamped when as_of precedes the latest backup
        let metrics = manager.rpo_rto_at(second.timestamp - ChronoDuration::hours(1));
        assert_eq!(metrics.rpo_minutes, 0.0);
        Ok(())
    }

    #[test]
    fn test_drill_leaves_no_residue() -> Result<()> {
        let mut f = fixture()?;
        f.engine.full_backup(f.source.path(), Some("full_1"));
        let manager = DisasterRecoveryManager::new(f.root.path());

        let report = manager.simulate_drill("full_1", None);
        assert_eq!(report.status, DrillStatus::Passed);
        assert!(report.recovery_successful);
        assert_eq!(report.file_count, 3);
        assert_eq!(
            report.integrity_check,
            Some(DrillIntegrity { valid: true, verified_files: 3, corrupted_files: 0 })
        );
        assert!(report.test_id.starts_with("test_"));
        assert!(!f.root.path().join(DRILL_DIR).exists());
        assert!(f.root.path().join("full/full_1/a").is_file());

        let failed = manager.simulate_drill("nope", Some(&f.root.path().join("scratch")));
        assert_eq!(failed.status, DrillStatus::Failed);
        assert!(!f.root.path().join("scratch").exists());
        Ok(())
    }

    #[test]
    fn test_list_available_flags_pruned_snapshots() -> Result<()> {
        let mut f = fixture()?;
        f.engine.full_backup(f.source.path(), Some("full_1"));
        f.engine.full_backup(&f.root.path().join("missing"), Some("full_bad"));
        write_file(&f.source.path().join("a"), b"alpha v2", hours_from_now(1))?;
        f.engine.incremental_backup(f.source.path(), Some("inc_1"));
        fs::remove_dir_all(f.root.path().join("incremental/inc_1"))?;
        let manager = DisasterRecoveryManager::new(f.root.path());

        let listed = manager.list_available();
        let ids: Vec<(&str, bool)> = listed.iter().map(|b| (b.id.as_str(), b.on_disk)).collect();
        assert_eq!(ids, vec![("full_1", true), ("inc_1", false)]);
        assert!(matches!(manager.find_path("inc_1"), Err(BackupError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_list_available_with_corrupt_history_is_empty() -> Result<()> {
        let root = TempDir::new()?;
        let layout = BackupLayout::new(root.path());
        layout.ensure()?;
        fs::write(layout.history_path(), b"{{{")?;

        let manager = DisasterRecoveryManager::new(root.path());
        assert!(manager.list_available().is_empty());
        assert_eq!(manager.rpo_rto(), RecoveryMetrics::default());
        Ok(())
    }
}
