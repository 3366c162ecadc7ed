//! Phase 2: import everything past the sample, one chunk at a time.

use dataforseo_client::TaskRequest;
use tracing::{info, instrument, warn};

use super::importer::{import_items, ImportTarget};
use super::polling::{poll_until_ready, ProgressWindow};
use super::tracker::RunTracker;
use super::PipelineConfig;
use crate::common::{Result, SyncError};
use crate::domains::reviews::commands::BackfillRequest;
use crate::domains::reviews::models::{stage, SyncRun};
use crate::kernel::ServerDeps;

/// One offset-scoped slice of the provider's listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: i64,
    pub size: i64,
}

/// Split `[offset, total)` into chunks of at most `chunk_size`.
pub fn plan_chunks(offset: i64, total: i64, chunk_size: u32) -> Vec<Chunk> {
    let size = i64::from(chunk_size.max(1));
    let mut chunks = Vec::new();
    let mut start = offset.max(0);
    while start < total {
        let len = size.min(total - start);
        chunks.push(Chunk {
            offset: start,
            size: len,
        });
        start += len;
    }
    chunks
}

/// Run Phase 2 on the run Phase 1 created.
///
/// Resumes after the records the run already accounts for, so a backfill
/// re-claimed after a crash does not fetch committed chunks again. A run that
/// is already terminal is returned untouched.
#[instrument(skip(deps, config, request), fields(run_id = %request.run_id, total = request.total_available))]
pub async fn run_backfill(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &BackfillRequest,
) -> Result<SyncRun> {
    let mut tracker = RunTracker::resume(deps.sync_runs.clone(), request.run_id).await?;
    if tracker.run().status.is_terminal() {
        info!(status = ?tracker.run().status, "Run already finished, skipping backfill");
        return Ok(tracker.run().clone());
    }

    match backfill(deps, config, request, &mut tracker).await {
        Ok(()) => {
            let run = tracker.complete().await;
            info!(
                imported = run.imported_count,
                skipped = run.skipped_count,
                errors = run.error_count,
                "Backfill complete"
            );
            Ok(run)
        }
        Err(e) => Err(tracker.fail(e).await),
    }
}

async fn backfill(
    deps: &ServerDeps,
    config: &PipelineConfig,
    request: &BackfillRequest,
    tracker: &mut RunTracker,
) -> Result<()> {
    let total = request.total_available;
    if tracker.run().total_available != Some(total) {
        tracker.set_total(total).await;
    }

    let start = request.offset.max(tracker.run().processed());
    let chunks = plan_chunks(start, total, config.chunk_size);
    let target = ImportTarget::for_run(tracker.run(), &config.source);
    info!(start, chunks = chunks.len(), "Backfill planned");

    for (i, chunk) in chunks.iter().enumerate() {
        let position = i + 1;
        if i > 0 {
            tokio::time::sleep(config.chunk_delay).await;
        }

        tracker
            .set_stage(stage::chunk(stage::FETCHING, position, chunks.len()))
            .await;

        let offset = u32::try_from(chunk.offset).map_err(|_| {
            SyncError::Validation(format!("chunk offset {} out of range", chunk.offset))
        })?;
        let depth = u32::try_from(chunk.size).unwrap_or(config.chunk_size);
        let task = TaskRequest::new(&request.business_name, depth)
            .with_offset(offset)
            .with_tag(&request.source_url);
        let task_id = deps.task_client.submit_task(&config.task_path, &task).await?;

        // Polling may fill up to half of this chunk's share of the bar
        let from = tracker.run().progress_percent as f64;
        let share = chunk.size as f64 * 100.0 / total as f64;
        let window = ProgressWindow::new(from, from + share / 2.0);
        let outcome = poll_until_ready(
            &deps.task_client,
            &config.task_path,
            &task_id,
            config.poll,
            window,
            tracker,
        )
        .await?;

        let mut items = outcome.items;
        if items.is_empty() {
            warn!(
                chunk = position,
                offset = chunk.offset,
                "Provider returned no reviews before the advertised total, stopping"
            );
            break;
        }
        items.truncate(usize::try_from(chunk.size).unwrap_or(0));
        let capacity = tracker.run().remaining_capacity().unwrap_or(0);
        items.truncate(usize::try_from(capacity).unwrap_or(0));

        tracker
            .set_stage(stage::chunk(stage::IMPORTING, position, chunks.len()))
            .await;
        let counts = import_items(
            deps.reviews.as_ref(),
            &items,
            &target,
            config.import_batch_size,
        )
        .await;
        tracker.record(counts).await;

        info!(
            chunk = position,
            of = chunks.len(),
            imported = counts.imported,
            skipped = counts.skipped,
            errors = counts.errors,
            progress = tracker.run().progress_percent,
            "Backfill chunk imported"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_splits_remainder() {
        assert_eq!(
            plan_chunks(10, 1210, 500),
            vec![
                Chunk { offset: 10, size: 500 },
                Chunk { offset: 510, size: 500 },
                Chunk { offset: 1010, size: 200 },
            ]
        );
    }

    #[test]
    fn test_plan_edges() {
        assert!(plan_chunks(100, 100, 500).is_empty());
        assert!(plan_chunks(150, 100, 500).is_empty());
        assert_eq!(plan_chunks(0, 3, 0).len(), 3);
        assert_eq!(plan_chunks(0, 500, 500), vec![Chunk { offset: 0, size: 500 }]);
    }
}
