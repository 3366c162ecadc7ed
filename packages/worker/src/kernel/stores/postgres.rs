//! PostgreSQL storage implementation.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never receive the
//! same job. Progress writes use `GREATEST` so a late, stale write can never
//! move a run's progress backwards.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder};

use crate::common::{JobId, Result, SyncError, SyncRunId, WorkerId};
use crate::domains::reviews::models::{ImportedRecord, SyncRun};
use crate::kernel::jobs::{EnqueueResult, Job, NewJob, WorkerRegistration, WorkerState};
use crate::kernel::traits::{JobQueue, ReviewStore, SyncRunStore, WorkerRegistry};

/// Postgres parameter limit is 65535; eleven columns per review row.
const MAX_REVIEWS_PER_STATEMENT: usize = 5_000;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Jobs
// =============================================================================

#[async_trait]
impl JobQueue for PostgresStore {
    async fn enqueue(&self, new: NewJob) -> Result<EnqueueResult> {
        let job = Job::from_new(new);

        let inserted: Option<JobId> = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, job_type, payload, priority, status, idempotency_key,
                              attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, 0, $6, $6)
            ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(&job.idempotency_key)
        .bind(job.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(EnqueueResult::Created(id));
        }

        let existing: JobId =
            sqlx::query_scalar("SELECT id FROM jobs WHERE idempotency_key = $1")
                .bind(&job.idempotency_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(EnqueueResult::Duplicate(existing))
    }

    async fn claim_next(
        &self,
        worker_id: WorkerId,
        job_types: &[String],
        lease: Duration,
    ) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND job_type = ANY($2)
                ORDER BY priority ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                worker_id = $1,
                lease_expires_at = NOW() + make_interval(secs => $3),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(job_types)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn extend_leases(
        &self,
        worker_id: WorkerId,
        job_ids: &[JobId],
        lease: Duration,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE id = ANY($2)
              AND worker_id = $1
              AND status = 'running'
            "#,
        )
        .bind(worker_id)
        .bind(job_ids)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_succeeded(&self, job_id: JobId, worker_id: WorkerId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                lease_expires_at = NULL,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND worker_id = $2
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, job_id: JobId, worker_id: WorkerId, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                lease_expires_at = NULL,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1
              AND worker_id = $2
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_expired_claims(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                worker_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND lease_expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('succeeded', 'failed')
              AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Sync runs
// =============================================================================

#[async_trait]
impl SyncRunStore for PostgresStore {
    async fn create_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, owner_id, source_url, business_name, phase, status, stage,
                                   progress_percent, total_available, imported_count,
                                   skipped_count, error_count, error_message, started_at,
                                   completed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(run.id)
        .bind(run.owner_id)
        .bind(&run.source_url)
        .bind(&run.business_name)
        .bind(run.phase)
        .bind(run.status)
        .bind(&run.stage)
        .bind(run.progress_percent)
        .bind(run.total_available)
        .bind(run.imported_count)
        .bind(run.skipped_count)
        .bind(run.error_count)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: SyncRunId) -> Result<Option<SyncRun>> {
        let run = sqlx::query_as::<_, SyncRun>("SELECT * FROM sync_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    async fn update_run(&self, run: &SyncRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET phase = $2,
                status = $3,
                stage = $4,
                progress_percent = GREATEST(progress_percent, $5),
                total_available = $6,
                imported_count = $7,
                skipped_count = $8,
                error_count = $9,
                error_message = $10,
                completed_at = $11,
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.phase)
        .bind(run.status)
        .bind(&run.stage)
        .bind(run.progress_percent)
        .bind(run.total_available)
        .bind(run.imported_count)
        .bind(run.skipped_count)
        .bind(run.error_count)
        .bind(&run.error_message)
        .bind(run.completed_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::RunNotFound(run.id));
        }
        Ok(())
    }

    async fn prune_runs(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_runs
            WHERE status IN ('completed', 'failed')
              AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Reviews
// =============================================================================

#[async_trait]
impl ReviewStore for PostgresStore {
    async fn existing_external_ids(
        &self,
        source: &str,
        external_ids: &[String],
    ) -> Result<HashSet<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT external_id
            FROM imported_reviews
            WHERE source = $1
              AND external_id = ANY($2)
            "#,
        )
        .bind(source)
        .bind(external_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn upsert_reviews(&self, records: &[ImportedRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in records.chunks(MAX_REVIEWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO imported_reviews (source, external_id, owner_id, source_url, \
                 author_name, rating, text, posted_at, raw_payload, imported_at, updated_at) ",
            );
            builder.push_values(chunk, |mut row, r| {
                row.push_bind(&r.source)
                    .push_bind(&r.external_id)
                    .push_bind(r.owner_id)
                    .push_bind(&r.source_url)
                    .push_bind(&r.author_name)
                    .push_bind(r.rating)
                    .push_bind(&r.text)
                    .push_bind(r.posted_at)
                    .push_bind(&r.raw_payload)
                    .push_bind(r.imported_at)
                    .push_bind(r.updated_at);
            });
            builder.push(
                " ON CONFLICT (source, external_id) DO UPDATE SET \
                 author_name = EXCLUDED.author_name, \
                 rating = EXCLUDED.rating, \
                 text = EXCLUDED.text, \
                 posted_at = EXCLUDED.posted_at, \
                 raw_payload = EXCLUDED.raw_payload, \
                 updated_at = NOW()",
            );

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn latest_posted_at(
        &self,
        source: &str,
        source_url: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(posted_at)
            FROM imported_reviews
            WHERE source = $1
              AND source_url = $2
            "#,
        )
        .bind(source)
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }
}

// =============================================================================
// Workers
// =============================================================================

#[async_trait]
impl WorkerRegistry for PostgresStore {
    async fn register(&self, registration: &WorkerRegistration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, hostname, max_concurrency, current_job_count, status,
                                 last_heartbeat, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                hostname = EXCLUDED.hostname,
                max_concurrency = EXCLUDED.max_concurrency,
                current_job_count = EXCLUDED.current_job_count,
                status = EXCLUDED.status,
                last_heartbeat = EXCLUDED.last_heartbeat,
                started_at = EXCLUDED.started_at
            "#,
        )
        .bind(registration.id)
        .bind(&registration.hostname)
        .bind(registration.max_concurrency)
        .bind(registration.current_job_count)
        .bind(registration.status)
        .bind(registration.last_heartbeat)
        .bind(registration.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(
        &self,
        worker_id: WorkerId,
        current_job_count: i32,
        status: WorkerState,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workers
            SET current_job_count = $2,
                status = $3,
                last_heartbeat = NOW()
            WHERE id = $1
            "#,
        )
        .bind(worker_id)
        .bind(current_job_count)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_offline(&self, worker_id: WorkerId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workers
            SET status = 'offline',
                current_job_count = 0,
                last_heartbeat = NOW()
            WHERE id = $1
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_offline(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM workers
            WHERE status = 'offline'
              AND last_heartbeat < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
