//! Phase 3: pick up reviews posted since the last import.

use dataforseo_client::TaskRequest;
use tracing::{info, instrument};

use super::importer::{import_items, ImportTarget};
use super::polling::{poll_until_ready, ProgressWindow};
use super::tracker::RunTracker;
use super::{open_run, PipelineConfig};
use crate::common::Result;
use crate::domains::reviews::commands::SyncRequest;
use crate::domains::reviews::models::{stage, SyncPhase, SyncRun};
use crate::kernel::retry::{database_retry, execute_with_retry};
use crate::kernel::ServerDeps;

const POLL_WINDOW: ProgressWindow = ProgressWindow {
    start: 0.0,
    end: 50.0,
};

/// Run Phase 3 for `request` in a new run.
pub async fn run_incremental(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &SyncRequest,
) -> Result<SyncRun> {
    let run = open_run(deps, request, SyncPhase::Incremental).await?;
    run_incremental_on(deps, config, request, run).await
}

/// Run Phase 3 on a run created by [`open_run`]. Always a single pass.
///
/// Only reviews strictly newer than the newest stored one are imported.
/// Without a stored review every returned review qualifies; with one, reviews
/// lacking a timestamp never do.
#[instrument(skip(deps, config, request, run), fields(run_id = %run.id, source_url = %request.source_url))]
pub async fn run_incremental_on(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &SyncRequest,
    run: SyncRun,
) -> Result<SyncRun> {
    let mut tracker = RunTracker::adopt(deps.sync_runs.clone(), run);

    match incremental(deps, config, request, &mut tracker).await {
        Ok(()) => {
            let run = tracker.complete().await;
            info!(run_id = %run.id, imported = run.imported_count, "Incremental sync complete");
            Ok(run)
        }
        Err(e) => Err(tracker.fail(e).await),
    }
}

async fn incremental(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &SyncRequest,
    tracker: &mut RunTracker,
) -> Result<()> {
    let watermark = execute_with_retry(
        || deps.reviews.latest_posted_at(&config.source, &request.source_url),
        &database_retry(),
    )
    .await?;
    info!(run_id = %tracker.id(), watermark = ?watermark, "Incremental sync started");

    tracker.set_stage(stage::FETCHING).await;
    let task = TaskRequest::new(&request.business_name, config.incremental_depth)
        .newest_first()
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

    let fresh: Vec<_> = outcome
        .items
        .into_iter()
        .take(config.incremental_depth as usize)
        .filter(|item| match watermark {
            Some(mark) => item.posted_at().is_some_and(|posted| posted > mark),
            None => true,
        })
        .collect();

    tracker.set_total(fresh.len() as i64).await;
    if fresh.is_empty() {
        return Ok(());
    }

    tracker.set_stage(stage::IMPORTING).await;
    let target = ImportTarget::for_run(tracker.run(), &config.source);
    let counts = import_items(
        deps.reviews.as_ref(),
        &fresh,
        &target,
        config.import_batch_size,
    )
    .await;
    tracker.record(counts).await;
    Ok(())
}
