//! Snapshot backup library
//!
//! Full, incremental and differential snapshots of a directory tree, sealed
//! with content-hash manifests, restorable singly or as a chain, pruned by a
//! per-type retention policy.

pub mod config;
pub mod engine;
pub mod events;
pub mod fs;
pub mod history;
pub mod integrity;
pub mod layout;
pub mod recovery;
pub mod retention;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use engine::BackupEngine;
pub use history::{BackupRecord, BackupStatus, BackupType};
pub use recovery::DisasterRecoveryManager;
pub use retention::RetentionManager;
pub use utils::errors::{BackupError, Result};

use serde::{Deserialize, Serialize};

/// Result of a capture or restore entry point. Operational failures are
/// reported here with `ok == false` and never returned as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub ok: bool,
    pub record: T,
}

impl<T> Outcome<T> {
    pub fn new(ok: bool, record: T) -> Self {
        Self { ok, record }
    }
}
