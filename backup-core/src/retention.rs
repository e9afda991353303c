//! Retention policy enforcement and version statistics.
//!
//! Works purely from the on-disk layout: snapshot age is the filesystem
//! creation time of the snapshot directory. The history document is not
//! rewritten when snapshots are pruned; readers treat a missing snapshot
//! directory as not found.

use crate::events::{self, EventSink, LifecycleEvent};
use crate::fs::walker::{calculate_total_size, count_files, WalkOptions};
use crate::history::BackupType;
use crate::integrity::manifest::MANIFEST_FILE_NAME;
use crate::layout::{BackupLayout, SnapshotDir};
use crate::utils::errors::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Maximum snapshot age per type, in days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_full_days")]
    pub full_backup_days: u32,
    #[serde(default = "default_incremental_days")]
    pub incremental_backup_days: u32,
    #[serde(default = "default_differential_days")]
    pub differential_backup_days: u32,
}

fn default_full_days() -> u32 {
    7
}

fn default_incremental_days() -> u32 {
    1
}

fn default_differential_days() -> u32 {
    3
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            full_backup_days: default_full_days(),
            incremental_backup_days: default_incremental_days(),
            differential_backup_days: default_differential_days(),
        }
    }
}

impl RetentionPolicy {
    pub fn max_age_days(&self, backup_type: BackupType) -> u32 {
        match backup_type {
            BackupType::Full => self.full_backup_days,
            BackupType::Incremental => self.incremental_backup_days,
            BackupType::Differential => self.differential_backup_days,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionReport {
    pub full_backups_deleted: usize,
    pub incremental_backups_deleted: usize,
    pub differential_backups_deleted: usize,
    pub total_space_freed_bytes: u64,
    pub deleted_ids: Vec<String>,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> usize {
        self.full_backups_deleted + self.incremental_backups_deleted + self.differential_backups_deleted
    }

    fn count_deleted(&mut self, backup_type: BackupType) {
        match backup_type {
            BackupType::Full => self.full_backups_deleted += 1,
            BackupType::Incremental => self.incremental_backups_deleted += 1,
            BackupType::Differential => self.differential_backups_deleted += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountByType {
    pub full: usize,
    pub incremental: usize,
    pub differential: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionStatistics {
    pub total_backups: usize,
    pub by_type: CountByType,
    pub total_size_bytes: u64,
    /// Snapshot content files; manifests are not counted
    pub total_files: usize,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
}

/// One member of a backup chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub timestamp: DateTime<Utc>,
}

impl From<&SnapshotDir> for ChainEntry {
    fn from(snapshot: &SnapshotDir) -> Self {
        Self {
            id: snapshot.id.clone(),
            backup_type: snapshot.backup_type,
            timestamp: snapshot.created,
        }
    }
}

pub struct RetentionManager {
    layout: BackupLayout,
    policy: RetentionPolicy,
    events: Arc<dyn EventSink>,
}

impl RetentionManager {
    pub fn new(layout: BackupLayout, policy: RetentionPolicy) -> Self {
        Self {
            layout,
            policy,
            events: events::noop(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Delete every snapshot older than its type's cutoff.
    pub fn apply_policy(&self) -> RetentionReport {
        self.apply_policy_at(Utc::now())
    }

    /// Same as `apply_policy` with an explicit notion of "now". A snapshot
    /// created exactly at the cutoff is kept.
    pub fn apply_policy_at(&self, now: DateTime<Utc>) -> RetentionReport {
        let mut report = RetentionReport::default();

        for backup_type in BackupType::ALL {
            let cutoff = now - Duration::days(i64::from(self.policy.max_age_days(backup_type)));

            let snapshots = match self.layout.list_snapshots(backup_type) {
                Ok(s) => s,
                Err(e) => {
                    error!(backup_type = %backup_type, error = %e, "Failed to scan snapshots");
                    continue;
                }
            };

            for snapshot in snapshots.iter().filter(|s| s.created < cutoff) {
                let size = calculate_total_size(&snapshot.path, &WalkOptions::default()).unwrap_or_else(|e| {
                    warn!(backup_id = %snapshot.id, error = %e, "Failed to size snapshot before deletion");
                    0
                });

                match std::fs::remove_dir_all(&snapshot.path) {
                    Ok(()) => {
                        info!(backup_id = %snapshot.id, backup_type = %backup_type, bytes = size, "Deleted expired snapshot");
                        report.count_deleted(backup_type);
                        report.total_space_freed_bytes += size;
                        report.deleted_ids.push(snapshot.id.clone());
                    }
                    Err(e) => {
                        error!(backup_id = %snapshot.id, error = %e, "Failed to delete expired snapshot");
                    }
                }
            }
        }

        self.events.emit(&LifecycleEvent::RetentionApplied {
            deleted_backups: report.total_deleted(),
            freed_bytes: report.total_space_freed_bytes,
        });

        report
    }

    /// Live scan of the snapshot directories.
    pub fn statistics(&self) -> Result<VersionStatistics> {
        let mut stats = VersionStatistics::default();
        let content_only = WalkOptions::excluding(MANIFEST_FILE_NAME);

        for snapshot in self.layout.all_snapshots()? {
            stats.total_backups += 1;
            match snapshot.backup_type {
                BackupType::Full => stats.by_type.full += 1,
                BackupType::Incremental => stats.by_type.incremental += 1,
                BackupType::Differential => stats.by_type.differential += 1,
            }
            stats.total_size_bytes += calculate_total_size(&snapshot.path, &WalkOptions::default())?;
            stats.total_files += count_files(&snapshot.path, &content_only)?;

            if stats.oldest_backup.map_or(true, |oldest| snapshot.created < oldest) {
                stats.oldest_backup = Some(snapshot.created);
            }
            if stats.newest_backup.map_or(true, |newest| snapshot.created > newest) {
                stats.newest_backup = Some(snapshot.created);
            }
        }

        Ok(stats)
    }

    /// The full snapshot followed by every incremental or differential
    /// snapshot created after it. Membership is inferred from creation times
    /// only. An unknown full id yields an empty chain.
    pub fn chain(&self, full_id: &str) -> Vec<ChainEntry> {
        let full_path = self.layout.snapshot_dir(BackupType::Full, full_id);
        let full_created = match std::fs::metadata(&full_path) {
            Ok(m) if m.is_dir() => DateTime::<Utc>::from(crate::layout::creation_time(&m)),
            _ => {
                warn!(backup_id = %full_id, "Full backup not found for chain lookup");
                return Vec::new();
            }
        };

        let mut chain = vec![ChainEntry {
            id: full_id.to_string(),
            backup_type: BackupType::Full,
            timestamp: full_created,
        }];

        for backup_type in [BackupType::Incremental, BackupType::Differential] {
            match self.layout.list_snapshots(backup_type) {
                Ok(snapshots) => chain.extend(
                    snapshots
                        .iter()
                        .filter(|s| s.created > full_created)
                        .map(ChainEntry::from),
                ),
                Err(e) => error!(backup_type = %backup_type, error = %e, "Failed to scan snapshots"),
            }
        }

        chain
    }
}
