//! Worker pool for processing queued jobs.
//!
//! The `WorkerPool` is a long-running service that:
//! - Registers itself in the worker registry
//! - Polls the queue and claims jobs up to `max_concurrency`
//! - Runs each job on its own task and records the outcome
//! - Sends heartbeats that also extend the leases of its running jobs
//! - On stop, drains in-flight jobs for a bounded time and goes offline
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//!     │
//!     ├─► poll loop:      claim_next() while active < max_concurrency
//!     │       └─► spawn:  JobHandler.handle(job) → mark_succeeded / mark_failed
//!     ├─► heartbeat loop: registry.heartbeat() + queue.extend_leases()
//!     ├─► maintenance:    cron release/prune (optional, see start_maintenance)
//!     └─► stop():         cancel loops → drain (≤ shutdown_timeout)
//!                         → abort leftovers, fail job + handler.abandon()
//!                         → stop scheduler → mark_offline
//! ```
//!
//! A job that fails is marked failed and never re-run by this worker. Job
//! outcomes are only written while this worker still holds the claim. A job
//! left behind by a crashed worker becomes claimable again once its lease
//! expires and the maintenance task releases it.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::Job;
use super::registration::{WorkerRegistration, WorkerState};
use crate::common::{JobId, Result, WorkerId};
use crate::kernel::deps::ServerDeps;
use crate::kernel::retry::{database_retry, execute_with_retry};
use crate::kernel::scheduled_tasks::{start_scheduler, MaintenanceConfig};
use crate::kernel::traits::{JobQueue, WorkerRegistry};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: WorkerId,
    pub hostname: String,
    /// Maximum number of jobs executing at once
    pub max_concurrency: usize,
    /// How often to look for new jobs
    pub poll_interval: Duration,
    /// How often to report liveness and extend job leases
    pub heartbeat_interval: Duration,
    /// How long `stop` waits for in-flight jobs
    pub shutdown_timeout: Duration,
    /// Lease granted on claim and on every heartbeat
    pub lease_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::new(),
            hostname: "localhost".to_string(),
            max_concurrency: 5,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            lease_duration: Duration::from_secs(600),
        }
    }
}

/// Executes claimed jobs. Implemented by the domain layer.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job types this handler can run. The pool only claims these.
    fn job_types(&self) -> Vec<String>;

    async fn handle(&self, job: &Job) -> Result<()>;

    /// Called for a job cut off at shutdown, after its task has stopped.
    async fn abandon(&self, _job: &Job, _reason: &str) {}
}

/// Error recorded on jobs still running when the drain timeout runs out.
pub const SHUTDOWN_REASON: &str = "worker shutdown";

#[derive(Debug)]
struct ActiveJob {
    job: Job,
    started_at: DateTime<Utc>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveJobSnapshot {
    pub job_id: JobId,
    pub job_type: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub hostname: String,
    pub state: WorkerState,
    pub accepting_jobs: bool,
    pub max_concurrency: usize,
    pub active_jobs: Vec<ActiveJobSnapshot>,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
    background: Mutex<Vec<JoinHandle<()>>>,
    scheduler: Mutex<Option<JobScheduler>>,
}

struct PoolInner {
    config: WorkerConfig,
    job_queue: Arc<dyn JobQueue>,
    registry: Arc<dyn WorkerRegistry>,
    handler: Arc<dyn JobHandler>,
    job_types: Vec<String>,
    active_jobs: DashMap<JobId, ActiveJob>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        job_queue: Arc<dyn JobQueue>,
        registry: Arc<dyn WorkerRegistry>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let job_types = handler.job_types();
        Self {
            inner: Arc::new(PoolInner {
                config,
                job_queue,
                registry,
                handler,
                job_types,
                active_jobs: DashMap::new(),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
            background: Mutex::new(Vec::new()),
            scheduler: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.inner.config.worker_id
    }

    /// Register and spawn the poll and heartbeat loops.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.inner.shutdown.is_cancelled() {
            bail!("worker pool has been stopped");
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            bail!("worker pool already started");
        }

        let config = &self.inner.config;
        let registration =
            WorkerRegistration::new(config.worker_id, &config.hostname, config.max_concurrency);
        execute_with_retry(
            || self.inner.registry.register(&registration),
            &database_retry(),
        )
        .await
        .context("Failed to register worker")?;

        info!(
            worker_id = %config.worker_id,
            hostname = %config.hostname,
            max_concurrency = config.max_concurrency,
            job_types = ?self.inner.job_types,
            "Worker pool starting"
        );

        let mut background = self.background.lock().await;
        background.push(tokio::spawn(Arc::clone(&self.inner).poll_loop()));
        background.push(tokio::spawn(Arc::clone(&self.inner).heartbeat_loop()));
        Ok(())
    }

    /// Run the cron maintenance tasks for as long as this pool runs.
    pub async fn start_maintenance(
        &self,
        deps: ServerDeps,
        config: MaintenanceConfig,
    ) -> anyhow::Result<()> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            bail!("maintenance already started");
        }
        *slot = Some(
            start_scheduler(deps, config)
                .await
                .context("Failed to start maintenance scheduler")?,
        );
        Ok(())
    }

    /// Stop claiming, wait up to `shutdown_timeout` for running jobs, then
    /// mark the worker offline. Jobs still running after the timeout are
    /// aborted and recorded as failed, and the handler settles their state.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if !self.inner.started.load(Ordering::SeqCst) || self.inner.shutdown.is_cancelled() {
            return Ok(());
        }

        let worker_id = self.inner.config.worker_id;
        info!(
            worker_id = %worker_id,
            active = self.inner.active_jobs.len(),
            "Worker pool stopping"
        );
        self.inner.shutdown.cancel();

        let handles = std::mem::take(&mut *self.background.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker background task ended abnormally");
            }
        }

        let deadline = Instant::now() + self.inner.config.shutdown_timeout;
        while !self.inner.active_jobs.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if !self.inner.active_jobs.is_empty() {
            warn!(
                remaining = self.inner.active_jobs.len(),
                "Shutdown timeout reached, abandoning running jobs"
            );
            self.inner.abandon_remaining().await;
        }

        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            if let Err(e) = scheduler.shutdown().await {
                warn!(error = %e, "Failed to stop maintenance scheduler");
            }
        }

        execute_with_retry(|| self.inner.registry.mark_offline(worker_id), &database_retry())
            .await
            .context("Failed to mark worker offline")?;

        info!(worker_id = %worker_id, "Worker pool stopped");
        Ok(())
    }

    /// Claim and dispatch as many jobs as free slots allow. Returns how many
    /// were claimed.
    pub async fn poll_once(&self) -> usize {
        self.inner.poll_once().await
    }

    pub fn active_job_count(&self) -> usize {
        self.inner.active_jobs.len()
    }

    pub fn status(&self) -> WorkerStatus {
        let mut active_jobs: Vec<_> = self
            .inner
            .active_jobs
            .iter()
            .map(|e| ActiveJobSnapshot {
                job_id: *e.key(),
                job_type: e.job.job_type.clone(),
                started_at: e.started_at,
            })
            .collect();
        active_jobs.sort_by_key(|j| j.started_at);

        let accepting_jobs =
            self.inner.started.load(Ordering::SeqCst) && !self.inner.shutdown.is_cancelled();
        let state = if !accepting_jobs && active_jobs.is_empty() {
            WorkerState::Offline
        } else {
            WorkerState::for_job_count(active_jobs.len())
        };

        WorkerStatus {
            worker_id: self.inner.config.worker_id,
            hostname: self.inner.config.hostname.clone(),
            state,
            accepting_jobs,
            max_concurrency: self.inner.config.max_concurrency,
            active_jobs,
        }
    }
}

impl PoolInner {
    async fn poll_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
        debug!(worker_id = %self.config.worker_id, "Poll loop stopped");
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => self.heartbeat().await,
            }
        }
        debug!(worker_id = %self.config.worker_id, "Heartbeat loop stopped");
    }

    async fn heartbeat(&self) {
        let worker_id = self.config.worker_id;
        let job_ids: Vec<JobId> = self.active_jobs.iter().map(|e| *e.key()).collect();
        let count = i32::try_from(job_ids.len()).unwrap_or(i32::MAX);

        if let Err(e) = self
            .registry
            .heartbeat(worker_id, count, WorkerState::for_job_count(job_ids.len()))
            .await
        {
            warn!(worker_id = %worker_id, error = %e, "Heartbeat failed");
        }

        if !job_ids.is_empty() {
            if let Err(e) = self
                .job_queue
                .extend_leases(worker_id, &job_ids, self.config.lease_duration)
                .await
            {
                warn!(worker_id = %worker_id, error = %e, "Failed to extend job leases");
            }
        }
    }

    async fn poll_once(self: &Arc<Self>) -> usize {
        let mut claimed = 0;

        while !self.shutdown.is_cancelled() && self.active_jobs.len() < self.config.max_concurrency
        {
            match self
                .job_queue
                .claim_next(
                    self.config.worker_id,
                    &self.job_types,
                    self.config.lease_duration,
                )
                .await
            {
                Ok(Some(job)) => {
                    claimed += 1;
                    self.dispatch(job);
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    break;
                }
            }
        }

        if claimed > 0 {
            debug!(claimed, active = self.active_jobs.len(), "Claimed jobs");
        }
        claimed
    }

    fn dispatch(self: &Arc<Self>, job: Job) {
        let job_id = job.id;
        self.active_jobs.insert(
            job_id,
            ActiveJob {
                job: job.clone(),
                started_at: Utc::now(),
                handle: None,
            },
        );

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            inner.run_job(job).await;
            inner.active_jobs.remove(&job_id);
        });

        if let Some(mut entry) = self.active_jobs.get_mut(&job_id) {
            entry.handle = Some(handle);
        }
    }

    /// Abort every job still tracked, wait for each task to stop, then record
    /// the job as failed and let the handler settle what it left behind.
    async fn abandon_remaining(&self) {
        let worker_id = self.config.worker_id;
        let job_ids: Vec<JobId> = self.active_jobs.iter().map(|e| *e.key()).collect();

        for job_id in job_ids {
            let Some((_, active)) = self.active_jobs.remove(&job_id) else {
                continue;
            };
            if let Some(handle) = active.handle {
                handle.abort();
                // The task must be gone before anything else touches its state.
                // Ok means it finished on its own and recorded its outcome.
                if handle.await.is_ok() {
                    continue;
                }
            }

            let job = active.job;
            warn!(job_id = %job.id, job_type = %job.job_type, "Abandoning job at shutdown");
            self.handler.abandon(&job, SHUTDOWN_REASON).await;

            let marked = execute_with_retry(
                || self.job_queue.mark_failed(job.id, worker_id, SHUTDOWN_REASON),
                &database_retry(),
            )
            .await;
            self.log_outcome_write(&job, marked);
        }
    }

    fn log_outcome_write(&self, job: &Job, marked: Result<bool>) {
        match marked {
            Ok(true) => {}
            Ok(false) => warn!(
                job_id = %job.id,
                worker_id = %self.config.worker_id,
                "Job outcome not recorded, claim no longer held by this worker"
            ),
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to record job outcome"),
        }
    }

    async fn run_job(&self, job: Job) {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Job started"
        );

        let outcome = AssertUnwindSafe(self.handler.handle(&job))
            .catch_unwind()
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let worker_id = self.config.worker_id;
        let marked = match outcome {
            Ok(Ok(())) => {
                info!(job_id = %job.id, job_type = %job.job_type, elapsed_ms, "Job succeeded");
                execute_with_retry(
                    || self.job_queue.mark_succeeded(job.id, worker_id),
                    &database_retry(),
                )
                .await
            }
            Ok(Err(e)) => {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    class = ?e.classification(),
                    error = %e,
                    elapsed_ms,
                    "Job failed"
                );
                let message = e.to_string();
                execute_with_retry(
                    || self.job_queue.mark_failed(job.id, worker_id, &message),
                    &database_retry(),
                )
                .await
            }
            Err(_) => {
                error!(job_id = %job.id, job_type = %job.job_type, "Job panicked");
                execute_with_retry(
                    || self.job_queue.mark_failed(job.id, worker_id, "job panicked"),
                    &database_retry(),
                )
                .await
            }
        };

        self.log_outcome_write(&job, marked);
    }
}
