//! Phase 1: count the business's reviews and import a small sample.

use dataforseo_client::TaskRequest;
use tracing::{info, instrument};

use super::importer::{import_items, ImportTarget};
use super::polling::{poll_until_ready, ProgressWindow};
use super::tracker::RunTracker;
use super::{open_run, PipelineConfig};
use crate::common::Result;
use crate::domains::reviews::commands::{BackfillRequest, ReviewJob, SyncRequest};
use crate::domains::reviews::models::{stage, SyncPhase, SyncRun};
use crate::kernel::retry::{database_retry, execute_with_retry};
use crate::kernel::ServerDeps;

const POLL_WINDOW: ProgressWindow = ProgressWindow {
    start: 0.0,
    end: 10.0,
};

/// Run Phase 1 for `request` in a new run.
pub async fn run_quick_sample(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &SyncRequest,
) -> Result<SyncRun> {
    let run = open_run(deps, request, SyncPhase::QuickSample).await?;
    run_quick_sample_on(deps, config, request, run).await
}

/// Run Phase 1 for `request` on a run created by [`open_run`].
///
/// The run ends `completed` when the sample covered everything. Otherwise it
/// stays `running` at stage `phase_1_complete` and exactly one backfill job is
/// queued for it.
#[instrument(skip(deps, config, request, run), fields(run_id = %run.id, source_url = %request.source_url))]
pub async fn run_quick_sample_on(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &SyncRequest,
    run: SyncRun,
) -> Result<SyncRun> {
    let mut tracker = RunTracker::adopt(deps.sync_runs.clone(), run);
    info!(run_id = %tracker.id(), "Quick sample started");

    match sample(deps, config, request, &mut tracker).await {
        Ok(Some(backfill)) => {
            tracker.set_stage(stage::PHASE_1_COMPLETE).await;
            info!(
                run_id = %tracker.id(),
                total_available = backfill.total_available,
                offset = backfill.offset,
                "Quick sample done, backfill queued"
            );
            Ok(tracker.run().clone())
        }
        Ok(None) => {
            let run = tracker.complete().await;
            info!(run_id = %run.id, imported = run.imported_count, "Quick sample covered all reviews");
            Ok(run)
        }
        Err(e) => Err(tracker.fail(e).await),
    }
}

/// Returns the queued backfill, if one was needed.
async fn sample(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &SyncRequest,
    tracker: &mut RunTracker,
) -> Result<Option<BackfillRequest>> {
    tracker.set_stage(stage::COUNTING).await;

    let task = TaskRequest::new(&request.business_name, config.sample_size)
        .with_tag(&request.source_url);
    let task_id = deps.task_client.submit_task(&config.task_path, &task).await?;
    let outcome = poll_until_ready(
        &deps.task_client,
        &config.task_path,
        &task_id,
        config.poll,
        POLL_WINDOW,
        tracker,
    )
    .await?;

    let mut items = outcome.items;
    let total = outcome.total_available.unwrap_or(items.len() as i64);
    tracker.set_total(total).await;

    items.truncate(config.sample_size as usize);
    let capacity = tracker.run().remaining_capacity().unwrap_or(0);
    items.truncate(usize::try_from(capacity).unwrap_or(0));

    tracker.set_stage(stage::IMPORTING).await;
    let target = ImportTarget::for_run(tracker.run(), &config.source);
    let counts = import_items(
        deps.reviews.as_ref(),
        &items,
        &target,
        config.import_batch_size,
    )
    .await;
    tracker.record(counts).await;

    if total <= config.sample_size as i64 {
        return Ok(None);
    }

    let backfill = BackfillRequest {
        run_id: tracker.id(),
        owner_id: request.owner_id,
        source_url: request.source_url.clone(),
        business_name: request.business_name.clone(),
        total_available: total,
        offset: items.len() as i64,
    };
    let job = ReviewJob::Backfill(backfill.clone()).to_new_job()?;
    let enqueued = execute_with_retry(
        || deps.job_queue.enqueue(job.clone()),
        &database_retry(),
    )
    .await?;
    if !enqueued.is_created() {
        info!(run_id = %tracker.id(), job_id = %enqueued.job_id(), "Backfill already queued");
    }
    Ok(Some(backfill))
}
