//! Utility modules shared by the backup components.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
