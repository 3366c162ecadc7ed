// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The import pipeline is written against these so that Postgres and the
// in-memory store are interchangeable.
//
// Naming convention: Remote* for external services, plain nouns for stores.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataforseo_client::{TaskRequest, TaskStatus};

use crate::common::{JobId, Result, SyncRunId, WorkerId};
use crate::domains::reviews::models::{ImportedRecord, SyncRun};
use crate::kernel::jobs::{EnqueueResult, Job, NewJob, WorkerRegistration, WorkerState};

// =============================================================================
// Extraction API
// =============================================================================

/// Task-based extraction API: create a task, then read it back.
#[async_trait]
pub trait RemoteTaskApi: Send + Sync {
    /// Create a task and return the provider's task id.
    async fn post_task(&self, path: &str, request: &TaskRequest) -> Result<String>;

    /// Read a task once.
    async fn get_task(&self, path: &str, task_id: &str) -> Result<TaskStatus>;
}

// =============================================================================
// Job queue
// =============================================================================

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job. A job whose idempotency key already exists is not
    /// inserted again.
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueResult>;

    /// Atomically claim the highest-priority pending job of one of `job_types`.
    /// Two workers never receive the same job.
    async fn claim_next(
        &self,
        worker_id: WorkerId,
        job_types: &[String],
        lease: Duration,
    ) -> Result<Option<Job>>;

    /// Push the lease of running jobs owned by `worker_id` forward.
    async fn extend_leases(&self, worker_id: WorkerId, job_ids: &[JobId], lease: Duration)
        -> Result<u64>;

    /// Finish a job as succeeded. Only applies while the job is still running
    /// under `worker_id`; returns false when the claim was lost.
    async fn mark_succeeded(&self, job_id: JobId, worker_id: WorkerId) -> Result<bool>;

    /// Finish a job as failed. Same ownership rule as `mark_succeeded`.
    async fn mark_failed(&self, job_id: JobId, worker_id: WorkerId, error: &str)
        -> Result<bool>;

    /// Return running jobs whose lease has lapsed to pending.
    async fn release_expired_claims(&self) -> Result<u64>;

    /// Delete succeeded/failed jobs last touched before `older_than`.
    async fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// Sync runs
// =============================================================================

#[async_trait]
pub trait SyncRunStore: Send + Sync {
    async fn create_run(&self, run: &SyncRun) -> Result<()>;

    async fn get_run(&self, id: SyncRunId) -> Result<Option<SyncRun>>;

    /// Write the mutable fields of `run`. Progress never moves backwards.
    async fn update_run(&self, run: &SyncRun) -> Result<()>;

    /// Delete terminal runs last touched before `older_than`.
    async fn prune_runs(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// Imported reviews
// =============================================================================

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Which of `external_ids` already exist for `source`.
    async fn existing_external_ids(
        &self,
        source: &str,
        external_ids: &[String],
    ) -> Result<HashSet<String>>;

    /// Insert or update records keyed by (source, external_id). All or nothing.
    async fn upsert_reviews(&self, records: &[ImportedRecord]) -> Result<u64>;

    /// Newest `posted_at` stored for a business.
    async fn latest_posted_at(&self, source: &str, source_url: &str)
        -> Result<Option<DateTime<Utc>>>;
}

// =============================================================================
// Worker registry
// =============================================================================

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Insert or replace the registration.
    async fn register(&self, registration: &WorkerRegistration) -> Result<()>;

    async fn heartbeat(
        &self,
        worker_id: WorkerId,
        current_job_count: i32,
        status: WorkerState,
    ) -> Result<()>;

    async fn mark_offline(&self, worker_id: WorkerId) -> Result<()>;

    /// Delete offline workers whose last heartbeat is before `older_than`.
    async fn prune_offline(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
