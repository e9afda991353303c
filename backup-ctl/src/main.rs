mod config;
mod services;

use crate::services::backup_scheduler::BackupScheduler;
use backup_core::events::TracingSink;
use backup_core::integrity::manifest::MANIFEST_FILE_NAME;
use backup_core::integrity::IntegrityChecker;
use backup_core::utils::logger;
use backup_core::layout::BackupLayout;
use backup_core::{BackupEngine, Config, DisasterRecoveryManager, RetentionManager};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[command(name = "backupctl", version, about = "Snapshot backups with integrity manifests")]
struct Cli {
    /// TOML configuration file (defaults to $BACKUP_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backup root, overriding the configuration
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy every file under SOURCE
    Full {
        source: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Copy files changed since the last completed backup
    Incremental {
        source: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Copy files changed since the last completed full backup
    Differential {
        source: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Restore one snapshot into DESTINATION
    Restore {
        backup_id: String,
        destination: PathBuf,
        #[arg(long)]
        recovery_id: Option<String>,
    },
    /// Restore a full snapshot, then apply increments in the given order
    RestoreChain {
        full_backup_id: String,
        destination: PathBuf,
        /// Increment id; repeat in application order
        #[arg(long = "increment")]
        increments: Vec<String>,
        #[arg(long)]
        recovery_id: Option<String>,
    },
    /// Rehearse a restore into a scratch directory
    Drill {
        backup_id: String,
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },
    /// Verify a directory against a manifest
    Verify {
        dir: PathBuf,
        /// Defaults to DIR/MANIFEST.json
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Combined content digest of a directory
    Digest { dir: PathBuf },
    /// Delete snapshots older than the retention policy
    Retention,
    /// Snapshot counts and sizes from disk
    Stats,
    /// A full snapshot and the snapshots created after it
    Chain { full_backup_id: String },
    /// RPO/RTO from history
    Metrics,
    /// Completed backups available for restore
    List,
    /// Every recorded backup attempt, newest first
    Summary,
    /// Delete all snapshots and history
    Purge {
        #[arg(long)]
        yes: bool,
    },
    /// Run the configured schedules until interrupted
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.storage.backup_root = root;
    }
    logger::init(&config.log)?;

    let ok = run(cli.command, &config).await?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run(command: Command, config: &Config) -> anyhow::Result<bool> {
    let root = config.storage.backup_root.clone();

    match command {
        Command::Full { source, id } => {
            let outcome = BackupEngine::from_config(config)?.full_backup(&source, id.as_deref());
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        Command::Incremental { source, id } => {
            let outcome = BackupEngine::from_config(config)?.incremental_backup(&source, id.as_deref());
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        Command::Differential { source, id } => {
            let outcome = BackupEngine::from_config(config)?.differential_backup(&source, id.as_deref());
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        Command::Restore { backup_id, destination, recovery_id } => {
            let outcome = DisasterRecoveryManager::from_config(config).restore(
                &backup_id,
                &destination,
                recovery_id.as_deref(),
            );
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        Command::RestoreChain { full_backup_id, destination, increments, recovery_id } => {
            let outcome = DisasterRecoveryManager::from_config(config).restore_chain(
                &full_backup_id,
                &increments,
                &destination,
                recovery_id.as_deref(),
            );
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        Command::Drill { backup_id, temp_dir } => {
            let report = DisasterRecoveryManager::from_config(config).simulate_drill(&backup_id, temp_dir.as_deref());
            print_json(&report)?;
            Ok(report.recovery_successful)
        }
        Command::Verify { dir, manifest } => {
            let manifest = manifest.unwrap_or_else(|| dir.join(MANIFEST_FILE_NAME));
            let report = checker(config).verify_with_manifest_file(&dir, &manifest);
            print_json(&report)?;
            Ok(report.valid)
        }
        Command::Digest { dir } => {
            let digest = checker(config).directory_digest(&dir)?;
            print_json(&serde_json::json!({
                "path": dir,
                "algorithm": config.integrity.algorithm,
                "digest": digest,
            }))?;
            Ok(true)
        }
        Command::Retention => {
            let report = retention(config, &root).apply_policy();
            print_json(&report)?;
            Ok(true)
        }
        Command::Stats => {
            print_json(&retention(config, &root).statistics()?)?;
            Ok(true)
        }
        Command::Chain { full_backup_id } => {
            let chain = retention(config, &root).chain(&full_backup_id);
            print_json(&chain)?;
            Ok(!chain.is_empty())
        }
        Command::Metrics => {
            print_json(&DisasterRecoveryManager::from_config(config).rpo_rto())?;
            Ok(true)
        }
        Command::List => {
            print_json(&DisasterRecoveryManager::from_config(config).list_available())?;
            Ok(true)
        }
        Command::Summary => {
            print_json(&BackupEngine::from_config(config)?.summary())?;
            Ok(true)
        }
        Command::Purge { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every backup under {} without --yes", root.display());
            }
            BackupEngine::from_config(config)?.purge_all()?;
            Ok(true)
        }
        Command::Daemon => {
            run_daemon(config).await?;
            Ok(true)
        }
    }
}

async fn run_daemon(config: &Config) -> anyhow::Result<()> {
    if config.schedule.is_empty() {
        anyhow::bail!("no [[schedule]] entries configured");
    }

    let engine = BackupEngine::from_config(config)?.with_events(Arc::new(TracingSink));
    let scheduler = BackupScheduler::new(engine).await?;

    for entry in &config.schedule {
        if let Err(e) = scheduler
            .schedule(entry.backup_type, &entry.source, entry.hour, entry.minute)
            .await
        {
            tracing::error!(source = %entry.source.display(), error = %e, "Failed to schedule backup");
        }
    }
    scheduler.start().await?;
    tracing::info!(
        root = %config.storage.backup_root.display(),
        jobs = scheduler.status().await.len(),
        "Scheduler running"
    );

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Received SIGINT");
            }
            _ = terminate.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("Received SIGINT");
    }

    Ok(())
}

fn checker(config: &Config) -> IntegrityChecker {
    IntegrityChecker::new(config.integrity.algorithm).with_chunk_size(config.integrity.chunk_size)
}

fn retention(config: &Config, root: &Path) -> RetentionManager {
    RetentionManager::new(BackupLayout::new(root), config.retention.clone())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_restore_chain() {
        let cli = Cli::parse_from([
            "backupctl",
            "--root",
            "/srv/backups",
            "restore-chain",
            "full_1",
            "/tmp/out",
            "--increment",
            "inc_1",
            "--increment",
            "inc_2",
        ]);

        assert_eq!(cli.root, Some(PathBuf::from("/srv/backups")));
        match cli.command {
            Command::RestoreChain { full_backup_id, increments, .. } => {
                assert_eq!(full_backup_id, "full_1");
                assert_eq!(increments, vec!["inc_1", "inc_2"]);
            }
            _ => panic!("expected restore-chain"),
        }
    }

    #[tokio::test]
    async fn test_run_full_then_list() -> anyhow::Result<()> {
        let root = tempfile::TempDir::new()?;
        let source = tempfile::TempDir::new()?;
        std::fs::write(source.path().join("a.txt"), b"hello")?;

        let mut config = Config::default();
        config.storage.backup_root = root.path().to_path_buf();

        let full = Command::Full { source: source.path().to_path_buf(), id: Some("full_1".into()) };
        assert!(run(full, &config).await?);
        assert!(run(Command::Chain { full_backup_id: "full_1".into() }, &config).await?);

        let restore = Command::Restore {
            backup_id: "missing".into(),
            destination: root.path().join("out"),
            recovery_id: None,
        };
        assert!(!run(restore, &config).await?);
        assert!(run(Command::Purge { yes: false }, &config).await.is_err());
        Ok(())
    }
}
