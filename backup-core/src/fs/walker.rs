//! Directory traversal for snapshot capture, sealing and restore.
//!
//! Walks are sorted by file name so inventories, manifests and digests come
//! out in a stable order.

use crate::utils::errors::Result;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// File names skipped wherever they appear (exact match)
    pub exclude_names: Vec<String>,
}

impl WalkOptions {
    /// Walk everything except files with the given name.
    pub fn excluding(name: &str) -> Self {
        Self {
            exclude_names: vec![name.to_string()],
        }
    }

    /// Whether `name` is one of the excluded file names.
    pub fn excludes(&self, name: &str) -> bool {
        self.exclude_names.iter().any(|excluded| excluded == name)
    }
}

/// Information about a regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks are resolved; links to directories and broken links yield None.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved,
                _ => return Ok(None),
            }
        } else {
            entry.metadata().map_err(std::io::Error::from)?
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
            modified: metadata.modified()?,
        }))
    }

    /// Relative path rendered with `/` separators, used as the key in
    /// history inventories and manifests.
    pub fn relative_key(&self) -> String {
        relative_key(&self.relative_path)
    }
}

/// Render a relative path with `/` separators regardless of platform.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree and collect all regular files
///
/// # Arguments
/// * `root` - Root directory to start walking from
/// * `options` - Walking options (name exclusions)
///
/// # Returns
/// * `Ok(Vec<FileInfo>)` - Files found, ordered by path
/// * `Err(BackupError::Walk)` - If the root or a subdirectory cannot be read
pub fn walk_directory(root: &Path, options: &WalkOptions) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, options, |file| files.push(file.clone()))?;
    Ok(files)
}

/// Walk a directory tree with a callback for each regular file
pub fn walk_directory_with_callback<F>(
    root: &Path,
    options: &WalkOptions,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(&FileInfo),
{
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;

        if entry.file_type().is_dir() || options.excludes(&entry.file_name().to_string_lossy()) {
            continue;
        }

        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            callback(&file_info);
        }
    }

    Ok(())
}

/// Count files in a directory (fast, without collecting)
pub fn count_files(root: &Path, options: &WalkOptions) -> Result<usize> {
    let mut count = 0;

    walk_directory_with_callback(root, options, |_| {
        count += 1;
    })?;

    Ok(count)
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path, options: &WalkOptions) -> Result<u64> {
    let mut total_size = 0u64;

    walk_directory_with_callback(root, options, |file| {
        total_size += file.size;
    })?;

    Ok(total_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::BackupError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories_sorted() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("b.txt"), b"content1")?;
        fs::write(temp_dir.path().join("a.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/c.txt"), b"content2")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        let keys: Vec<String> = files.iter().map(|f| f.relative_key()).collect();
        assert_eq!(keys, vec!["a.txt", "b.txt", "subdir/c.txt"]);

        Ok(())
    }

    #[test]
    fn test_count_and_size() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file1.txt"), b"12345")?;
        fs::write(temp_dir.path().join("file2.txt"), b"1234567")?;

        assert_eq!(count_files(temp_dir.path(), &WalkOptions::default())?, 2);
        assert_eq!(calculate_total_size(temp_dir.path(), &WalkOptions::default())?, 12);

        Ok(())
    }

    #[test]
    fn test_exclude_exact_name_only() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("MANIFEST.json"), b"{}")?;
        fs::write(temp_dir.path().join("nested/MANIFEST.json"), b"{}")?;
        fs::write(temp_dir.path().join("MANIFEST.json.bak"), b"keep")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::excluding("MANIFEST.json"))?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_key(), "MANIFEST.json.bak");

        Ok(())
    }

    #[test]
    fn test_missing_root_is_error() {
        let result = walk_directory(Path::new("/definitely/not/here"), &WalkOptions::default());
        assert!(matches!(result, Err(BackupError::Walk(_))));
    }

    #[test]
    fn test_relative_key_normalizes_separators() {
        let path: PathBuf = ["docs", "2024", "report.txt"].iter().collect();
        assert_eq!(relative_key(&path), "docs/2024/report.txt");
    }
}
