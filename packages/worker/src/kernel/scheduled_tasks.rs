//! Scheduled maintenance using tokio-cron-scheduler.
//!
//! - Release expired job claims (every minute)
//! - Prune finished jobs, terminal runs and offline workers (daily)
//!
//! Both tasks are idempotent, so several worker processes may run them
//! concurrently.

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use super::deps::ServerDeps;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Cron expression (with seconds) for releasing expired claims
    pub release_schedule: String,
    /// Cron expression (with seconds) for the retention prune
    pub prune_schedule: String,
    pub retention_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            release_schedule: "0 * * * * *".to_string(),
            prune_schedule: "0 30 3 * * *".to_string(),
            retention_days: 30,
        }
    }
}

/// Counts removed by one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub jobs: u64,
    pub runs: u64,
    pub workers: u64,
}

/// Start all scheduled tasks
pub async fn start_scheduler(deps: ServerDeps, config: MaintenanceConfig) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let release_deps = deps.clone();
    let release_job = CronJob::new_async(config.release_schedule.as_str(), move |_uuid, _lock| {
        let deps = release_deps.clone();
        Box::pin(async move {
            if let Err(e) = run_release_expired_claims(&deps).await {
                tracing::error!("Release expired claims task failed: {}", e);
            }
        })
    })?;
    scheduler.add(release_job).await?;

    let prune_deps = deps.clone();
    let retention_days = config.retention_days;
    let prune_job = CronJob::new_async(config.prune_schedule.as_str(), move |_uuid, _lock| {
        let deps = prune_deps.clone();
        Box::pin(async move {
            if let Err(e) = run_retention_prune(&deps, retention_days).await {
                tracing::error!("Retention prune task failed: {}", e);
            }
        })
    })?;
    scheduler.add(prune_job).await?;

    scheduler.start().await?;

    tracing::info!(
        release_schedule = %config.release_schedule,
        prune_schedule = %config.prune_schedule,
        retention_days,
        "Scheduled maintenance started"
    );
    Ok(scheduler)
}

/// Return jobs held by dead workers to the queue.
pub async fn run_release_expired_claims(deps: &ServerDeps) -> Result<u64> {
    let released = deps.job_queue.release_expired_claims().await?;
    if released > 0 {
        tracing::warn!(released, "Released expired job claims");
    }
    Ok(released)
}

/// Delete finished jobs, terminal runs and offline workers older than the
/// retention window.
pub async fn run_retention_prune(deps: &ServerDeps, retention_days: i64) -> Result<PruneReport> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);

    let report = PruneReport {
        jobs: deps.job_queue.prune_finished(cutoff).await?,
        runs: deps.sync_runs.prune_runs(cutoff).await?,
        workers: deps.workers.prune_offline(cutoff).await?,
    };

    tracing::info!(
        jobs = report.jobs,
        runs = report.runs,
        workers = report.workers,
        retention_days,
        "Retention prune complete"
    );
    Ok(report)
}
