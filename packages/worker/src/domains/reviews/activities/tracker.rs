//! In-memory owner of a `SyncRun` while a phase runs.
//!
//! The tracker is the only writer of the run during a phase. Creating and
//! loading the run must succeed; every later write is best-effort so that a
//! flaky datastore never turns a good import into a failed one.

use std::sync::Arc;

use tracing::warn;

use crate::common::{Result, SyncError, SyncRunId};
use crate::domains::reviews::models::{ImportCounts, SyncRun};
use crate::kernel::retry::{database_retry, execute_with_retry};
use crate::kernel::traits::SyncRunStore;

pub(crate) struct RunTracker {
    store: Arc<dyn SyncRunStore>,
    run: SyncRun,
}

impl RunTracker {
    /// Persist a fresh run and start tracking it.
    pub async fn create(store: Arc<dyn SyncRunStore>, run: SyncRun) -> Result<Self> {
        execute_with_retry(|| store.create_run(&run), &database_retry()).await?;
        Ok(Self { store, run })
    }

    /// Track a run that was already persisted.
    pub fn adopt(store: Arc<dyn SyncRunStore>, run: SyncRun) -> Self {
        Self { store, run }
    }

    /// Pick up an existing run.
    pub async fn resume(store: Arc<dyn SyncRunStore>, id: SyncRunId) -> Result<Self> {
        let run = execute_with_retry(|| store.get_run(id), &database_retry())
            .await?
            .ok_or(SyncError::RunNotFound(id))?;
        Ok(Self { store, run })
    }

    pub fn run(&self) -> &SyncRun {
        &self.run
    }

    pub fn id(&self) -> SyncRunId {
        self.run.id
    }

    pub async fn set_stage(&mut self, stage: impl Into<String>) {
        self.run.set_stage(stage);
        self.save().await;
    }

    pub async fn set_total(&mut self, total: i64) {
        self.run.total_available = Some(total);
        self.save().await;
    }

    /// Raise progress. Only writes when the integer percentage moved.
    pub async fn advance(&mut self, percent: f64) {
        let before = self.run.progress_percent;
        self.run.advance_progress(percent);
        if self.run.progress_percent != before {
            self.save().await;
        }
    }

    /// Add outcome counts and move progress to processed/total.
    pub async fn record(&mut self, counts: ImportCounts) {
        self.run.add_counts(counts);
        if let Some(percent) = self.run.import_percent() {
            self.run.advance_progress(percent);
        }
        self.save().await;
    }

    pub async fn complete(mut self) -> SyncRun {
        self.run.mark_completed();
        self.save().await;
        self.run
    }

    /// Mark the run failed and hand the error back for propagation.
    pub async fn fail(mut self, error: SyncError) -> SyncError {
        self.run.mark_failed(error.to_string());
        self.save().await;
        error
    }

    /// Write the run as it is now. Failures are logged, never raised.
    pub async fn save(&self) {
        let store = &self.store;
        let run = &self.run;
        if let Err(e) = execute_with_retry(|| store.update_run(run), &database_retry()).await {
            warn!(
                run_id = %run.id,
                stage = %run.stage,
                progress = run.progress_percent,
                error = %e,
                "Failed to persist sync run progress"
            );
        }
    }
}
