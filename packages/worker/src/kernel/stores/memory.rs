//! In-memory storage implementation for testing and development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::{JobId, Result, SyncError, SyncRunId, WorkerId};
use crate::domains::reviews::models::{ImportedRecord, SyncRun};
use crate::kernel::jobs::{EnqueueResult, Job, JobStatus, NewJob, WorkerRegistration, WorkerState};
use crate::kernel::traits::{JobQueue, ReviewStore, SyncRunStore, WorkerRegistry};

/// In-memory storage for jobs, runs, reviews and workers.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    runs: RwLock<HashMap<SyncRunId, SyncRun>>,
    reviews: RwLock<HashMap<(String, String), ImportedRecord>>,
    workers: RwLock<HashMap<WorkerId, WorkerRegistration>>,
    failing_review_writes: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            reviews: RwLock::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
            failing_review_writes: AtomicU32::new(0),
        }
    }

    /// Make the next `count` review upserts fail with a rejected write.
    pub fn fail_next_review_writes(&self, count: u32) {
        self.failing_review_writes.store(count, Ordering::SeqCst);
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.read().unwrap().get(&id).cloned()
    }

    pub fn jobs_of_type(&self, job_type: &str) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|j| j.job_type == job_type)
            .collect()
    }

    /// Overwrite a job in place. Lets tests age leases and timestamps.
    pub fn put_job(&self, job: Job) {
        self.jobs.write().unwrap().insert(job.id, job);
    }

    pub fn run(&self, id: SyncRunId) -> Option<SyncRun> {
        self.runs.read().unwrap().get(&id).cloned()
    }

    pub fn runs(&self) -> Vec<SyncRun> {
        let mut runs: Vec<SyncRun> = self.runs.read().unwrap().values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    pub fn put_run(&self, run: SyncRun) {
        self.runs.write().unwrap().insert(run.id, run);
    }

    /// Reviews stored for a business.
    pub fn reviews_for(&self, source_url: &str) -> Vec<ImportedRecord> {
        let mut reviews: Vec<ImportedRecord> = self
            .reviews
            .read()
            .unwrap()
            .values()
            .filter(|r| r.source_url == source_url)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        reviews
    }

    pub fn review_count(&self) -> usize {
        self.reviews.read().unwrap().len()
    }

    pub fn put_review(&self, record: ImportedRecord) {
        self.reviews.write().unwrap().insert(
            (record.source.clone(), record.external_id.clone()),
            record,
        );
    }

    pub fn worker(&self, id: WorkerId) -> Option<WorkerRegistration> {
        self.workers.read().unwrap().get(&id).cloned()
    }

    pub fn put_worker(&self, registration: WorkerRegistration) {
        self.workers
            .write()
            .unwrap()
            .insert(registration.id, registration);
    }
}

fn lease_deadline(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, new: NewJob) -> Result<EnqueueResult> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = jobs
                .values()
                .find(|j| j.idempotency_key.as_ref() == Some(key))
            {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let job = Job::from_new(new);
        let id = job.id;
        jobs.insert(id, job);
        Ok(EnqueueResult::Created(id))
    }

    async fn claim_next(
        &self,
        worker_id: WorkerId,
        job_types: &[String],
        lease: Duration,
    ) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().unwrap();
        let next = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && job_types.contains(&j.job_type))
            .min_by_key(|j| (j.priority, j.created_at, j.id))
            .map(|j| j.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.worker_id = Some(worker_id);
        job.lease_expires_at = Some(lease_deadline(lease));
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn extend_leases(
        &self,
        worker_id: WorkerId,
        job_ids: &[JobId],
        lease: Duration,
    ) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap();
        let deadline = lease_deadline(lease);
        let mut extended = 0;
        for id in job_ids {
            if let Some(job) = jobs.get_mut(id) {
                if job.status == JobStatus::Running && job.worker_id == Some(worker_id) {
                    job.lease_expires_at = Some(deadline);
                    extended += 1;
                }
            }
        }
        Ok(extended)
    }

    async fn mark_succeeded(&self, job_id: JobId, worker_id: WorkerId) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if job.is_running_on(worker_id) => {
                job.status = JobStatus::Succeeded;
                job.lease_expires_at = None;
                job.error_message = None;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, job_id: JobId, worker_id: WorkerId, error: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if job.is_running_on(worker_id) => {
                job.status = JobStatus::Failed;
                job.lease_expires_at = None;
                job.error_message = Some(error.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_expired_claims(&self) -> Result<u64> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();
        let mut released = 0;
        for job in jobs.values_mut().filter(|j| j.lease_expired(now)) {
            job.status = JobStatus::Pending;
            job.worker_id = None;
            job.lease_expires_at = None;
            job.updated_at = now;
            released += 1;
        }
        Ok(released)
    }

    async fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| !(j.status.is_finished() && j.updated_at < older_than));
        Ok((before - jobs.len()) as u64)
    }
}

#[async_trait]
impl SyncRunStore for MemoryStore {
    async fn create_run(&self, run: &SyncRun) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        if runs.contains_key(&run.id) {
            return Err(SyncError::Rejected(format!("sync run {} already exists", run.id)));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: SyncRunId) -> Result<Option<SyncRun>> {
        Ok(self.runs.read().unwrap().get(&id).cloned())
    }

    async fn update_run(&self, run: &SyncRun) -> Result<()> {
        let mut runs = self.runs.write().unwrap();
        let stored = runs.get_mut(&run.id).ok_or(SyncError::RunNotFound(run.id))?;
        let progress = stored.progress_percent.max(run.progress_percent);
        *stored = run.clone();
        stored.progress_percent = progress;
        Ok(())
    }

    async fn prune_runs(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut runs = self.runs.write().unwrap();
        let before = runs.len();
        runs.retain(|_, r| !(r.status.is_terminal() && r.updated_at < older_than));
        Ok((before - runs.len()) as u64)
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn existing_external_ids(
        &self,
        source: &str,
        external_ids: &[String],
    ) -> Result<HashSet<String>> {
        let reviews = self.reviews.read().unwrap();
        Ok(external_ids
            .iter()
            .filter(|id| reviews.contains_key(&(source.to_string(), (*id).clone())))
            .cloned()
            .collect())
    }

    async fn upsert_reviews(&self, records: &[ImportedRecord]) -> Result<u64> {
        let pending = self.failing_review_writes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_review_writes.store(pending - 1, Ordering::SeqCst);
            return Err(SyncError::Rejected("injected review write failure".into()));
        }

        let mut reviews = self.reviews.write().unwrap();
        for record in records {
            let key = (record.source.clone(), record.external_id.clone());
            match reviews.get_mut(&key) {
                Some(existing) => {
                    let imported_at = existing.imported_at;
                    *existing = record.clone();
                    existing.imported_at = imported_at;
                    existing.updated_at = Utc::now();
                }
                None => {
                    reviews.insert(key, record.clone());
                }
            }
        }
        Ok(records.len() as u64)
    }

    async fn latest_posted_at(
        &self,
        source: &str,
        source_url: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .reviews
            .read()
            .unwrap()
            .values()
            .filter(|r| r.source == source && r.source_url == source_url)
            .filter_map(|r| r.posted_at)
            .max())
    }
}

#[async_trait]
impl WorkerRegistry for MemoryStore {
    async fn register(&self, registration: &WorkerRegistration) -> Result<()> {
        self.workers
            .write()
            .unwrap()
            .insert(registration.id, registration.clone());
        Ok(())
    }

    async fn heartbeat(
        &self,
        worker_id: WorkerId,
        current_job_count: i32,
        status: WorkerState,
    ) -> Result<()> {
        let mut workers = self.workers.write().unwrap();
        if let Some(worker) = workers.get_mut(&worker_id) {
            worker.current_job_count = current_job_count;
            worker.status = status;
            worker.last_heartbeat = Utc::now();
        }
        Ok(())
    }

    async fn mark_offline(&self, worker_id: WorkerId) -> Result<()> {
        let mut workers = self.workers.write().unwrap();
        if let Some(worker) = workers.get_mut(&worker_id) {
            worker.status = WorkerState::Offline;
            worker.current_job_count = 0;
            worker.last_heartbeat = Utc::now();
        }
        Ok(())
    }

    async fn prune_offline(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut workers = self.workers.write().unwrap();
        let before = workers.len();
        workers.retain(|_, w| !(w.status == WorkerState::Offline && w.last_heartbeat < older_than));
        Ok((before - workers.len()) as u64)
    }
}
