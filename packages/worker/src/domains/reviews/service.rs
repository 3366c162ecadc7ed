//! Inbound entry points for review imports.
//!
//! Request handlers call these. Phase 1 and Phase 3 run inline and return once
//! their run is settled; Phase 2 is only ever started by Phase 1.
//!
//! Errors raised before the run exists (validation, the run insert) are
//! returned. Once the run exists its id is always returned, and a phase failure
//! is read back through [`ReviewSyncService::get_progress`].

use tracing::{info, warn};

use super::activities::ImportPipeline;
use super::commands::SyncRequest;
use super::models::{SyncPhase, SyncRun};
use crate::common::{OwnerId, Result, SyncRunId};
use crate::kernel::retry::{database_retry, execute_with_retry};

#[derive(Clone)]
pub struct ReviewSyncService {
    pipeline: ImportPipeline,
}

impl ReviewSyncService {
    pub fn new(pipeline: ImportPipeline) -> Self {
        Self { pipeline }
    }

    /// Count and sample a business's reviews. Queues the backfill when the
    /// sample did not cover everything.
    pub async fn start_phase1(
        &self,
        owner_id: OwnerId,
        source_url: &str,
        business_name: &str,
    ) -> Result<SyncRunId> {
        let request = SyncRequest::new(owner_id, source_url, business_name);
        let run = self.pipeline.open_run(&request, SyncPhase::QuickSample).await?;
        let run_id = run.id;
        info!(run_id = %run_id, owner_id = %owner_id, source_url, "Starting review import");

        if let Err(e) = self.pipeline.quick_sample_on(&request, run).await {
            warn!(run_id = %run_id, error = %e, "Review import failed");
        }
        Ok(run_id)
    }

    /// Import reviews posted since the last import.
    pub async fn start_phase3(
        &self,
        owner_id: OwnerId,
        source_url: &str,
        business_name: &str,
    ) -> Result<SyncRunId> {
        let request = SyncRequest::new(owner_id, source_url, business_name);
        let run = self.pipeline.open_run(&request, SyncPhase::Incremental).await?;
        let run_id = run.id;
        info!(run_id = %run_id, owner_id = %owner_id, source_url, "Starting incremental review sync");

        if let Err(e) = self.pipeline.incremental_on(&request, run).await {
            warn!(run_id = %run_id, error = %e, "Incremental review sync failed");
        }
        Ok(run_id)
    }

    pub async fn get_progress(&self, run_id: SyncRunId) -> Result<Option<SyncRun>> {
        let runs = &self.pipeline.deps().sync_runs;
        execute_with_retry(|| runs.get_run(run_id), &database_retry()).await
    }
}
