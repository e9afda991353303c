//! File metadata handling for capture and restore.
//!
//! Copies made by the engine and the recovery manager keep the source's
//! modification time and permission bits, so a restored tree compares equal
//! to the source tree under the same mtime-based change detection.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Copy `source` to `target`, creating parent directories and carrying over
/// the modification time and permissions. Returns the number of bytes copied.
///
/// The modification time is set through the still-open target handle, which
/// keeps read-only sources copyable.
pub fn copy_preserving(source: &Path, target: &Path) -> std::io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut reader = fs::File::open(source)?;
    let metadata = reader.metadata()?;

    // A read-only file left by an earlier copy cannot be truncated in place.
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut writer = fs::File::create(target)?;
    let bytes = std::io::copy(&mut reader, &mut writer)?;
    writer.set_modified(metadata.modified()?)?;
    drop(writer);

    fs::set_permissions(target, metadata.permissions())?;

    Ok(bytes)
}

/// Seconds since the Unix epoch with sub-second precision. Times before the
/// epoch come out negative.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}
