use backup_core::Config;
use std::path::{Path, PathBuf};

/// Load the TOML configuration and apply environment overrides.
///
/// The file comes from `--config`, else `BACKUP_CONFIG`, else built-in
/// defaults. `BACKUP_ROOT` and `LOG_LEVEL` override the file. A `.env` file in
/// the working directory is read first.
pub fn load(config_path: Option<&Path>) -> anyhow::Result<Config> {
    let _ = dotenvy::dotenv();

    let path = config_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("BACKUP_CONFIG").ok().map(PathBuf::from));

    let mut config = match path {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = lookup("BACKUP_ROOT").filter(|v| !v.is_empty()) {
        config.storage.backup_root = PathBuf::from(root);
    }
    if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.is_empty()) {
        config.log.level = level;
    }
}
