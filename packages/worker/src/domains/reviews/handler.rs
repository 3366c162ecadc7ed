//! Runs claimed review jobs.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, error};

use super::activities::ImportPipeline;
use super::commands::ReviewJob;
use super::models::SyncPhase;
use crate::common::{JobId, Result, SyncRunId};
use crate::kernel::jobs::{Job, JobHandler};

pub struct ReviewJobHandler {
    pipeline: ImportPipeline,
    /// Run each in-flight job is working on
    runs: DashMap<JobId, SyncRunId>,
}

impl ReviewJobHandler {
    pub fn new(pipeline: ImportPipeline) -> Self {
        Self {
            pipeline,
            runs: DashMap::new(),
        }
    }
}

#[async_trait]
impl JobHandler for ReviewJobHandler {
    fn job_types(&self) -> Vec<String> {
        ReviewJob::job_types()
    }

    async fn handle(&self, job: &Job) -> Result<()> {
        let command = ReviewJob::from_job(job)?;
        let result = match &command {
            ReviewJob::QuickSample(request) => {
                let run = self.pipeline.open_run(request, SyncPhase::QuickSample).await?;
                self.runs.insert(job.id, run.id);
                self.pipeline.quick_sample_on(request, run).await
            }
            ReviewJob::Backfill(request) => {
                self.runs.insert(job.id, request.run_id);
                self.pipeline.backfill(request).await
            }
            ReviewJob::Incremental(request) => {
                let run = self.pipeline.open_run(request, SyncPhase::Incremental).await?;
                self.runs.insert(job.id, run.id);
                self.pipeline.incremental_on(request, run).await
            }
        };
        self.runs.remove(&job.id);

        let run = result?;
        debug!(
            job_id = %job.id,
            run_id = %run.id,
            status = ?run.status,
            "Review job finished"
        );
        Ok(())
    }

    async fn abandon(&self, job: &Job, reason: &str) {
        let Some((_, run_id)) = self.runs.remove(&job.id) else {
            return;
        };
        if let Err(e) = self.pipeline.abandon_run(run_id, reason).await {
            error!(job_id = %job.id, run_id = %run_id, error = %e, "Failed to fail abandoned run");
        }
    }
}
