use backup_core::{BackupEngine, BackupRecord, BackupType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// One daily backup in the job table.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledBackup {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub source: PathBuf,
    pub hour: u32,
    pub minute: u32,
    pub cron: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Runs backups of one backup root on daily cron schedules.
///
/// All jobs share a single engine behind a mutex, so runs against the root
/// never overlap even when their schedules do.
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    engine: Arc<std::sync::Mutex<BackupEngine>>,
    jobs: Mutex<Vec<ScheduledBackup>>,
}

impl BackupScheduler {
    pub async fn new(engine: BackupEngine) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            engine: Arc::new(std::sync::Mutex::new(engine)),
            jobs: Mutex::new(Vec::new()),
        })
    }

    /// Run `backup_type` of `source` every day at `hour:minute` UTC.
    pub async fn schedule(&self, backup_type: BackupType, source: &Path, hour: u32, minute: u32) -> anyhow::Result<Uuid> {
        if hour > 23 || minute > 59 {
            anyhow::bail!("invalid schedule time {:02}:{:02}", hour, minute);
        }

        let cron = daily_cron(hour, minute);
        let engine = self.engine.clone();
        let src = source.to_path_buf();

        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let engine = engine.clone();
            let src = src.clone();
            Box::pin(async move {
                run_backup(engine, backup_type, src).await;
            })
        })?;

        let job_id = self.scheduler.lock().await.add(job).await?;
        self.jobs.lock().await.push(ScheduledBackup {
            job_id,
            backup_type,
            source: source.to_path_buf(),
            hour,
            minute,
            cron: cron.clone(),
            scheduled_at: Utc::now(),
        });

        tracing::info!(job_id = %job_id, backup_type = %backup_type, source = %source.display(), cron = %cron, "Job scheduled");
        Ok(job_id)
    }

    /// Remove every scheduled job. Returns how many were removed.
    pub async fn cancel_all(&self) -> anyhow::Result<usize> {
        let scheduler = self.scheduler.lock().await;
        let mut jobs = self.jobs.lock().await;

        for job in jobs.iter() {
            scheduler.remove(&job.job_id).await?;
        }
        let count = jobs.len();
        jobs.clear();

        tracing::info!(count, "All scheduled jobs cancelled");
        Ok(count)
    }

    /// Snapshot of the job table.
    pub async fn status(&self) -> Vec<ScheduledBackup> {
        self.jobs.lock().await.clone()
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Six-field cron expression (with seconds) for a daily run.
pub fn daily_cron(hour: u32, minute: u32) -> String {
    format!("0 {} {} * * *", minute, hour)
}

/// Run one backup on the blocking pool, holding the engine lock for its
/// whole duration.
pub async fn run_backup(
    engine: Arc<std::sync::Mutex<BackupEngine>>,
    backup_type: BackupType,
    source: PathBuf,
) -> Option<BackupRecord> {
    tracing::info!(backup_type = %backup_type, source = %source.display(), "Starting scheduled backup");

    let result = tokio::task::spawn_blocking(move || {
        let mut engine = engine
            .lock()
            .map_err(|_| anyhow::anyhow!("backup engine lock poisoned"))?;
        let outcome = match backup_type {
            BackupType::Full => engine.full_backup(&source, None),
            BackupType::Incremental => engine.incremental_backup(&source, None),
            BackupType::Differential => engine.differential_backup(&source, None),
        };
        Ok::<_, anyhow::Error>(outcome)
    })
    .await;

    match result {
        Ok(Ok(outcome)) => {
            if outcome.ok {
                tracing::info!(backup_id = %outcome.record.id, status = %outcome.record.status, "Scheduled backup finished");
            } else {
                tracing::error!(
                    backup_id = %outcome.record.id,
                    error = %outcome.record.error.as_deref().unwrap_or("unknown"),
                    "Scheduled backup failed"
                );
            }
            Some(outcome.record)
        }
        Ok(Err(e)) => {
            tracing::error!(backup_type = %backup_type, error = %e, "Scheduled backup could not run");
            None
        }
        Err(e) => {
            tracing::error!(backup_type = %backup_type, error = %e, "Scheduled backup task panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::BackupStatus;
    use tempfile::TempDir;

    #[test]
    fn test_daily_cron() {
        assert_eq!(daily_cron(2, 30), "0 30 2 * * *");
        assert_eq!(daily_cron(0, 0), "0 0 0 * * *");
    }

    #[tokio::test]
    async fn test_schedule_status_and_cancel() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let source = TempDir::new()?;
        let scheduler = BackupScheduler::new(BackupEngine::new(root.path())?).await?;

        let full = scheduler.schedule(BackupType::Full, source.path(), 2, 0).await?;
        scheduler.schedule(BackupType::Incremental, source.path(), 14, 30).await?;

        let status = scheduler.status().await;
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].job_id, full);
        assert_eq!(status[0].cron, "0 0 2 * * *");
        assert_eq!(status[1].backup_type, BackupType::Incremental);
        assert_eq!(status[1].cron, "0 30 14 * * *");

        assert_eq!(scheduler.cancel_all().await?, 2);
        assert!(scheduler.status().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_schedule_rejects_bad_time() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let scheduler = BackupScheduler::new(BackupEngine::new(root.path())?).await?;

        assert!(scheduler.schedule(BackupType::Full, root.path(), 24, 0).await.is_err());
        assert!(scheduler.schedule(BackupType::Full, root.path(), 1, 60).await.is_err());
        assert!(scheduler.status().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_backup_uses_engine() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let source = TempDir::new()?;
        std::fs::write(source.path().join("a.txt"), b"hello")?;
        let engine = Arc::new(std::sync::Mutex::new(BackupEngine::new(root.path())?));

        let record = run_backup(engine.clone(), BackupType::Full, source.path().to_path_buf())
            .await
            .expect("backup ran");
        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.file_count, 1);

        let engine = engine.lock().unwrap();
        assert_eq!(engine.history().records().len(), 1);
        Ok(())
    }
}
