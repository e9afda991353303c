//! Content hashing and snapshot verification.
//!
//! Files are streamed through the configured digest in fixed-size chunks, so
//! memory use stays bounded regardless of file size.

pub mod manifest;

use crate::events::{self, EventSink, LifecycleEvent};
use crate::fs::metadata::epoch_seconds;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use manifest::{Manifest, ManifestEntry, MANIFEST_FILE_NAME};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Default read buffer when hashing (8 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Digest prefix length kept in corruption reports
const REPORT_DIGEST_PREFIX: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    fn hasher(&self) -> StreamHasher {
        match self {
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => StreamHasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(BackupError::Config(format!("unknown hash algorithm: {}", other))),
        }
    }
}

enum StreamHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Sha256(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// A file whose current digest differs from the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorruptedFile {
    pub file: String,
    pub expected_hash: String,
    pub actual_hash: String,
}

/// Outcome of checking a directory against a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub total_files: usize,
    pub verified_files: usize,
    pub corrupted_files: Vec<CorruptedFile>,
    pub missing_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Set when the manifest itself could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationReport {
    fn empty() -> Self {
        Self {
            valid: false,
            total_files: 0,
            verified_files: 0,
            corrupted_files: Vec::new(),
            missing_files: Vec::new(),
            timestamp: Utc::now(),
            error: None,
        }
    }
}

/// Computes and checks content hashes for snapshots.
#[derive(Clone)]
pub struct IntegrityChecker {
    algorithm: HashAlgorithm,
    chunk_size: usize,
    events: Arc<dyn EventSink>,
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl IntegrityChecker {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            chunk_size: DEFAULT_CHUNK_SIZE,
            events: events::noop(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hex digest of a file using the checker's algorithm.
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        self.hash_file_with(self.algorithm, path)
    }

    fn hash_file_with(&self, algorithm: HashAlgorithm, path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = algorithm.hasher();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finalize_hex())
    }

    /// Hash every regular file under `dir` and write the manifest into `dir`.
    ///
    /// Any unreadable file fails the whole build: a manifest with holes would
    /// make later verification meaningless.
    pub fn build_manifest(&self, dir: &Path) -> Result<Manifest> {
        let mut manifest = Manifest::new(self.algorithm);

        let files = walk_directory(dir, &WalkOptions::excluding(MANIFEST_FILE_NAME))?;
        for file in files {
            let hash = self.hash_file(&file.path).map_err(|e| {
                error!(path = %file.path.display(), error = %e, "Failed to hash file");
                e
            })?;
            manifest.files.insert(
                file.relative_key(),
                ManifestEntry {
                    hash,
                    size: file.size,
                    modified: epoch_seconds(file.modified),
                },
            );
        }

        manifest.save(&dir.join(MANIFEST_FILE_NAME))?;
        debug!(dir = %dir.display(), files = manifest.files.len(), bytes = manifest.total_bytes(), "Manifest created");

        Ok(manifest)
    }

    /// Check every manifest entry against the files under `dir`.
    ///
    /// Digests are computed with the manifest's own algorithm. A file that
    /// exists but cannot be read is reported as corrupted.
    pub fn verify(&self, dir: &Path, manifest: &Manifest) -> VerificationReport {
        let mut report = VerificationReport::empty();
        report.total_files = manifest.files.len();

        for (relative, entry) in &manifest.files {
            let full_path = dir.join(relative);

            if !full_path.is_file() {
                report.missing_files.push(relative.clone());
                continue;
            }

            match self.hash_file_with(manifest.algorithm, &full_path) {
                Ok(actual) if actual == entry.hash => report.verified_files += 1,
                Ok(actual) => report.corrupted_files.push(CorruptedFile {
                    file: relative.clone(),
                    expected_hash: truncate_digest(&entry.hash),
                    actual_hash: truncate_digest(&actual),
                }),
                Err(e) => report.corrupted_files.push(CorruptedFile {
                    file: relative.clone(),
                    expected_hash: truncate_digest(&entry.hash),
                    actual_hash: format!("unreadable: {}", e),
                }),
            }
        }

        report.valid = report.missing_files.is_empty() && report.corrupted_files.is_empty();
        self.emit_checked(dir, &report);
        report
    }

    /// Load the manifest at `manifest_path` and verify `dir` against it.
    /// An unreadable manifest produces an invalid report rather than an error.
    pub fn verify_with_manifest_file(&self, dir: &Path, manifest_path: &Path) -> VerificationReport {
        match Manifest::load(manifest_path) {
            Ok(manifest) => self.verify(dir, &manifest),
            Err(e) => {
                error!(manifest = %manifest_path.display(), error = %e, "Failed to read manifest");
                let mut report = VerificationReport::empty();
                report.error = Some(e.to_string());
                self.emit_checked(dir, &report);
                report
            }
        }
    }

    /// Compare a single file against an expected digest.
    pub fn verify_file(&self, path: &Path, expected_hash: &str) -> bool {
        let valid = match self.hash_file(path) {
            Ok(actual) => actual == expected_hash,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to hash file for verification");
                false
            }
        };

        self.events.emit(&LifecycleEvent::IntegrityChecked {
            target: path.display().to_string(),
            valid,
            verified_files: usize::from(valid),
            total_files: 1,
        });
        valid
    }

    /// Combined digest over the per-file digests of every file under `dir`,
    /// taken in lexicographic order of relative path. The manifest file is
    /// left out so a snapshot and its restored copy digest the same.
    pub fn directory_digest(&self, dir: &Path) -> Result<String> {
        let mut files = walk_directory(dir, &WalkOptions::excluding(MANIFEST_FILE_NAME))?;
        files.sort_by_key(|f| f.relative_key());

        let mut combined = self.algorithm.hasher();
        for file in &files {
            combined.update(self.hash_file(&file.path)?.as_bytes());
        }

        Ok(combined.finalize_hex())
    }

    fn emit_checked(&self, dir: &Path, report: &VerificationReport) {
        self.events.emit(&LifecycleEvent::IntegrityChecked {
            target: dir.display().to_string(),
            valid: report.valid,
            verified_files: report.verified_files,
            total_files: report.total_files,
        });
    }
}

fn truncate_digest(digest: &str) -> String {
    match digest.get(..REPORT_DIGEST_PREFIX) {
        Some(prefix) if digest.len() > REPORT_DIGEST_PREFIX => format!("{}...", prefix),
        _ => digest.to_string(),
    }
}
