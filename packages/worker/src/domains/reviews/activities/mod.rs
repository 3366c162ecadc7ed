//! Review import activities.
//!
//! ```text
//! Phase 1  quick_sample   count + small sample, enqueues Phase 2 if more exist
//! Phase 2  backfill       remainder in chunks, continues the Phase 1 run
//! Phase 3  incremental    newest reviews past the stored watermark, own run
//! ```
//!
//! Every phase owns its run through a tracker, fails the run on the first
//! error and returns that error to the caller. Phase 1 and Phase 3 runs can be
//! opened ahead of the work so callers hold the run id even when the phase
//! fails.

pub mod backfill;
pub mod importer;
pub mod incremental;
pub mod polling;
pub mod quick_sample;
mod tracker;

use std::time::Duration;

use tracing::warn;

use crate::common::{Result, SyncRunId};
use crate::domains::reviews::commands::{BackfillRequest, SyncRequest};
use crate::domains::reviews::models::{SyncPhase, SyncRun, GOOGLE_SOURCE};
use crate::kernel::retry::{database_retry, execute_with_retry};
use crate::kernel::ServerDeps;
use tracker::RunTracker;

pub use backfill::{plan_chunks, run_backfill, Chunk};
pub use importer::{import_items, map_review_item, ImportTarget};
pub use incremental::{run_incremental, run_incremental_on};
pub use polling::{PollOptions, ProgressWindow, TaskOutcome};
pub use quick_sample::{run_quick_sample, run_quick_sample_on};

/// Validate `request` and persist a fresh run for `phase`.
pub async fn open_run(deps: &ServerDeps, request: &SyncRequest, phase: SyncPhase) -> Result<SyncRun> {
    request.validate()?;
    let run = SyncRun::new(
        request.owner_id,
        &request.source_url,
        &request.business_name,
        phase,
    );
    let tracker = RunTracker::create(deps.sync_runs.clone(), run).await?;
    Ok(tracker.run().clone())
}

/// Fail a run whose phase was cut off. Returns the failed run, or `None` when
/// the run had already finished.
pub async fn abandon_run(
    deps: &ServerDeps,
    run_id: SyncRunId,
    reason: &str,
) -> Result<Option<SyncRun>> {
    let store = &deps.sync_runs;
    let Some(mut run) = execute_with_retry(|| store.get_run(run_id), &database_retry()).await?
    else {
        return Ok(None);
    };
    if run.status.is_terminal() {
        return Ok(None);
    }

    warn!(run_id = %run.id, stage = %run.stage, reason, "Failing interrupted sync run");
    run.mark_failed(reason);
    execute_with_retry(|| store.update_run(&run), &database_retry()).await?;
    Ok(Some(run))
}

/// Tuning of the import pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Depth of the Phase 1 task
    pub sample_size: u32,
    /// Depth of each Phase 2 task
    pub chunk_size: u32,
    /// Pause between Phase 2 chunks
    pub chunk_delay: Duration,
    pub poll: PollOptions,
    /// Depth of the Phase 3 task
    pub incremental_depth: u32,
    /// Records per datastore write
    pub import_batch_size: usize,
    /// Extraction API endpoint, relative to the API base
    pub task_path: String,
    /// Provider name stored on every record
    pub source: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_size: 10,
            chunk_size: 500,
            chunk_delay: Duration::from_secs(2),
            poll: PollOptions::default(),
            incremental_depth: 50,
            import_batch_size: 100,
            task_path: "business_data/google/reviews".to_string(),
            source: GOOGLE_SOURCE.to_string(),
        }
    }
}

/// Dependencies and configuration shared by all three phases.
#[derive(Clone)]
pub struct ImportPipeline {
    deps: ServerDeps,
    config: PipelineConfig,
}

impl ImportPipeline {
    pub fn new(deps: ServerDeps, config: PipelineConfig) -> Self {
        Self { deps, config }
    }

    pub fn deps(&self) -> &ServerDeps {
        &self.deps
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn open_run(&self, request: &SyncRequest, phase: SyncPhase) -> Result<SyncRun> {
        open_run(&self.deps, request, phase).await
    }

    pub async fn quick_sample(&self, request: &SyncRequest) -> Result<SyncRun> {
        run_quick_sample(&self.deps, &self.config, request).await
    }

    pub async fn quick_sample_on(&self, request: &SyncRequest, run: SyncRun) -> Result<SyncRun> {
        run_quick_sample_on(&self.deps, &self.config, request, run).await
    }

    pub async fn backfill(&self, request: &BackfillRequest) -> Result<SyncRun> {
        run_backfill(&self.deps, &self.config, request).await
    }

    pub async fn incremental(&self, request: &SyncRequest) -> Result<SyncRun> {
        run_incremental(&self.deps, &self.config, request).await
    }

    pub async fn incremental_on(&self, request: &SyncRequest, run: SyncRun) -> Result<SyncRun> {
        run_incremental_on(&self.deps, &self.config, request, run).await
    }

    pub async fn abandon_run(&self, run_id: SyncRunId, reason: &str) -> Result<Option<SyncRun>> {
        abandon_run(&self.deps, run_id, reason).await
    }
}
