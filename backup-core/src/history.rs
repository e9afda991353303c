//! Backup history store.
//!
//! Every backup attempt, successful or not, becomes one `BackupRecord` in
//! `.metadata/backup_history.json`. The document is regenerated on every save
//! and replaced atomically (temp file + rename).
//!
//! Timestamps are normalized here and nowhere else: older documents may carry
//! naive ISO-8601 strings (local time), RFC 3339 strings, epoch seconds, or
//! serde's structured `SystemTime` form. All load as `DateTime<Utc>` and are
//! always written back as RFC 3339.

use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
    Differential,
}

impl BackupType {
    /// Probe order for id lookups and directory scans.
    pub const ALL: [BackupType; 3] = [BackupType::Full, BackupType::Incremental, BackupType::Differential];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            "differential" => Ok(BackupType::Differential),
            other => Err(BackupError::Config(format!("unknown backup type: {}", other))),
        }
    }
}

/// Lifecycle of one backup or recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::CompletedWithWarnings => "completed_with_warnings",
            BackupStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inventory entry for one captured file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Seconds since the Unix epoch
    pub modified: f64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    /// Start of the attempt
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: PathBuf,
    pub status: BackupStatus,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupRecord {
    /// A fresh `in_progress` record stamped with the current time.
    pub fn started(id: impl Into<String>, backup_type: BackupType, source: &Path) -> Self {
        Self {
            id: id.into(),
            backup_type,
            timestamp: Utc::now(),
            source: source.to_path_buf(),
            status: BackupStatus::InProgress,
            file_count: 0,
            size_bytes: 0,
            duration_seconds: 0.0,
            files: BTreeMap::new(),
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BackupStatus::Completed
    }
}

/// The persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupHistory {
    pub backups: Vec<BackupRecord>,
}

#[derive(Deserialize)]
struct RawHistory {
    #[serde(default)]
    backups: Vec<Value>,
}

/// File-backed history of backup attempts for one backup root.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    history: BackupHistory,
}

impl HistoryStore {
    /// Open the store at `path`, loading whatever is there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history = Self::load(&path);
        Self { path, history }
    }

    /// Read a history document. A missing or unreadable document yields an
    /// empty history; individual malformed records are skipped.
    pub fn load(path: &Path) -> BackupHistory {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BackupHistory::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read backup history, starting empty");
                return BackupHistory::default();
            }
        };

        let raw: RawHistory = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Backup history is corrupt, starting empty");
                return BackupHistory::default();
            }
        };

        let mut backups = Vec::with_capacity(raw.backups.len());
        for (index, value) in raw.backups.into_iter().enumerate() {
            match serde_json::from_value::<BackupRecord>(value) {
                Ok(record) => backups.push(record),
                Err(e) => warn!(index, error = %e, "Skipping malformed backup record"),
            }
        }

        BackupHistory { backups }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[BackupRecord] {
        &self.history.backups
    }

    pub fn get(&self, id: &str) -> Option<&BackupRecord> {
        self.history.backups.iter().find(|r| r.id == id)
    }

    /// Append a record. A previous record with the same id is dropped so ids
    /// stay unique and the document stays in start order.
    pub fn append(&mut self, record: BackupRecord) {
        let before = self.history.backups.len();
        self.history.backups.retain(|r| r.id != record.id);
        if self.history.backups.len() != before {
            warn!(backup_id = %record.id, "Replacing earlier history record with the same id");
        }
        self.history.backups.push(record);
    }

    pub fn clear(&mut self) {
        self.history.backups.clear();
    }

    /// Write the whole document to a temp file next to the target, then
    /// rename it into place.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.history)?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), records = self.history.backups.len(), "Backup history saved");
        Ok(())
    }

    /// Start time of the newest completed backup of any type, or one year
    /// before `now` when there is none.
    pub fn last_backup_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.newest_completed(|_| true).unwrap_or_else(|| now - Duration::days(365))
    }

    /// Start time of the newest completed full backup, or one year before `now`.
    pub fn last_full_backup_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.newest_completed(|r| r.backup_type == BackupType::Full)
            .unwrap_or_else(|| now - Duration::days(365))
    }

    fn newest_completed<F>(&self, filter: F) -> Option<DateTime<Utc>>
    where
        F: Fn(&BackupRecord) -> bool,
    {
        self.history
            .backups
            .iter()
            .rev()
            .find(|r| r.is_completed() && filter(r))
            .map(|r| r.timestamp)
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(normalize_timestamp(&value).unwrap_or_else(|| {
        warn!(value = %value, "Unparseable backup timestamp, using current time");
        Utc::now()
    }))
}

/// Convert any of the accepted timestamp shapes to UTC.
pub fn normalize_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => from_epoch(n.as_f64()?),
        Value::Object(map) => {
            let secs = map.get("secs_since_epoch")?.as_i64()?;
            let nanos = map.get("nanos_since_epoch").and_then(Value::as_u64).unwrap_or(0);
            Utc.timestamp_opt(secs, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(s, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}
