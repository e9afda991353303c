//! Lifecycle events emitted by the engine, the recovery manager, the
//! integrity checker and the retention manager.
//!
//! Components hold an `Arc<dyn EventSink>`; `NoopSink` is the default so
//! nothing has to check whether a logger was supplied.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum LifecycleEvent {
    #[serde(rename = "backup:started")]
    BackupStarted {
        backup_id: String,
        backup_type: String,
        source: String,
        destination: String,
    },

    #[serde(rename = "backup:completed")]
    BackupCompleted {
        backup_id: String,
        backup_type: String,
        file_count: usize,
        size_bytes: u64,
        duration_seconds: f64,
    },

    #[serde(rename = "backup:failed")]
    BackupFailed {
        backup_id: String,
        backup_type: String,
        error: String,
    },

    #[serde(rename = "recovery:started")]
    RecoveryStarted {
        recovery_id: String,
        backup_id: String,
        destination: String,
    },

    #[serde(rename = "recovery:completed")]
    RecoveryCompleted {
        recovery_id: String,
        status: String,
        file_count: usize,
        duration_seconds: f64,
        rto_seconds: f64,
    },

    #[serde(rename = "recovery:failed")]
    RecoveryFailed { recovery_id: String, error: String },

    #[serde(rename = "integrity:checked")]
    IntegrityChecked {
        target: String,
        valid: bool,
        verified_files: usize,
        total_files: usize,
    },

    #[serde(rename = "retention:applied")]
    RetentionApplied { deleted_backups: usize, freed_bytes: u64 },
}

/// Receiver for lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &LifecycleEvent) {}
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::BackupStarted { backup_id, backup_type, source, destination } => {
                info!(backup_id = %backup_id, backup_type = %backup_type, source = %source, destination = %destination, "Backup started");
            }
            LifecycleEvent::BackupCompleted { backup_id, file_count, size_bytes, duration_seconds, .. } => {
                info!(
                    backup_id = %backup_id,
                    files = file_count,
                    size_mb = %format!("{:.2}", *size_bytes as f64 / (1024.0 * 1024.0)),
                    duration = %format!("{:.2}s", duration_seconds),
                    "Backup completed"
                );
            }
            LifecycleEvent::BackupFailed { backup_id, error, .. } => {
                error!(backup_id = %backup_id, error = %error, "Backup failed");
            }
            LifecycleEvent::RecoveryStarted { recovery_id, backup_id, destination } => {
                info!(recovery_id = %recovery_id, backup_id = %backup_id, destination = %destination, "Recovery started");
            }
            LifecycleEvent::RecoveryCompleted { recovery_id, status, file_count, duration_seconds, rto_seconds } => {
                info!(
                    recovery_id = %recovery_id,
                    status = %status,
                    files = file_count,
                    duration = %format!("{:.2}s", duration_seconds),
                    rto = %format!("{:.2}s", rto_seconds),
                    "Recovery completed"
                );
            }
            LifecycleEvent::RecoveryFailed { recovery_id, error } => {
                error!(recovery_id = %recovery_id, error = %error, "Recovery failed");
            }
            LifecycleEvent::IntegrityChecked { target, valid, verified_files, total_files } => {
                if *valid {
                    info!(path = %target, verified = verified_files, total = total_files, "Integrity check passed");
                } else {
                    warn!(path = %target, verified = verified_files, total = total_files, "Integrity check found problems");
                }
            }
            LifecycleEvent::RetentionApplied { deleted_backups, freed_bytes } => {
                info!(
                    deleted = deleted_backups,
                    freed_mb = %format!("{:.2}", *freed_bytes as f64 / (1024.0 * 1024.0)),
                    "Version cleanup"
                );
            }
        }
    }
}

pub fn noop() -> Arc<dyn EventSink> {
    Arc::new(NoopSink)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Collects events for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<LifecycleEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &LifecycleEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = LifecycleEvent::BackupFailed {
            backup_id: "full_20260101_020000".to_string(),
            backup_type: "full".to_string(),
            error: "disk full".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "backup:failed");
        assert_eq!(json["payload"]["error"], "disk full");

        let back: LifecycleEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_sinks_accept_every_event() {
        let events = vec![
            LifecycleEvent::RetentionApplied { deleted_backups: 2, freed_bytes: 4096 },
            LifecycleEvent::IntegrityChecked {
                target: "/tmp/x".to_string(),
                valid: false,
                verified_files: 1,
                total_files: 2,
            },
        ];
        for event in &events {
            NoopSink.emit(event);
            TracingSink.emit(event);
        }
    }
}
