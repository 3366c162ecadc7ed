//! End-to-end runs of the three import phases against the in-memory store and
//! the scripted task API.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;

use common::*;
use review_worker::common::{OwnerId, SyncError};
use review_worker::domains::reviews::commands::BACKFILL_JOB;
use review_worker::domains::reviews::models::{stage, RunStatus, SyncPhase};
use review_worker::domains::reviews::{
    PipelineConfig, ReviewJob, ReviewJobHandler, ReviewSyncService,
};
use review_worker::kernel::jobs::JobHandler;
use review_worker::kernel::test_dependencies::{review_dataset, review_json};
use review_worker::kernel::MockTaskApi;

#[tokio::test(start_paused = true)]
async fn quick_sample_covering_everything_completes_without_backfill() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(8, Utc::now())));

    let run = fx.pipeline.quick_sample(&fx.request()).await.unwrap();

    assert_eq!(run.phase, SyncPhase::QuickSample);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_available, Some(8));
    assert_eq!(run.imported_count, 8);
    assert_eq!(run.progress_percent, 100);
    assert!(fx.deps.store.jobs_of_type(BACKFILL_JOB).is_empty());

    let stored = fx.deps.store.run(run.id).unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert!(stored.completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn quick_sample_queues_exactly_one_backfill() {
    let fx = PipelineFixture::new(
        MockTaskApi::new()
            .with_reviews(review_dataset(1210, Utc::now()))
            .with_polls_before_ready(2),
    );

    let run = fx.pipeline.quick_sample(&fx.request()).await.unwrap();

    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.stage, stage::PHASE_1_COMPLETE);
    assert_eq!(run.total_available, Some(1210));
    assert_eq!(run.imported_count, 10);
    assert!(run.progress_percent <= 10);

    let jobs = fx.deps.store.jobs_of_type(BACKFILL_JOB);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].idempotency_key, Some(format!("phase2:{}", run.id)));

    let ReviewJob::Backfill(request) = ReviewJob::from_job(&jobs[0]).unwrap() else {
        panic!("expected a backfill job");
    };
    assert_eq!(request.run_id, run.id);
    assert_eq!(request.offset, 10);
    assert_eq!(request.total_available, 1210);
}

#[tokio::test(start_paused = true)]
async fn backfill_imports_remainder_in_chunks() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(1210, Utc::now())));
    let sample = fx.pipeline.quick_sample(&fx.request()).await.unwrap();

    let job = fx.deps.store.jobs_of_type(BACKFILL_JOB).remove(0);
    let ReviewJob::Backfill(request) = ReviewJob::from_job(&job).unwrap() else {
        panic!("expected a backfill job");
    };
    let run = fx.pipeline.backfill(&request).await.unwrap();

    assert_eq!(run.id, sample.id);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.imported_count, 1210);
    assert_eq!(run.skipped_count + run.error_count, 0);
    assert_eq!(run.progress_percent, 100);
    assert_eq!(fx.deps.store.review_count(), 1210);

    let chunks: Vec<_> = fx
        .deps
        .task_api
        .posted_requests()
        .into_iter()
        .skip(1)
        .map(|r| (r.offset, r.depth))
        .collect();
    assert_eq!(
        chunks,
        vec![(Some(10), 500), (Some(510), 500), (Some(1010), 200)]
    );
}

#[tokio::test(start_paused = true)]
async fn backfill_failing_mid_way_keeps_committed_chunks() {
    // Posts: sample, chunk 1, chunk 2 (rejected)
    let fx = PipelineFixture::new(
        MockTaskApi::new()
            .with_reviews(review_dataset(1210, Utc::now()))
            .with_post_failure_at(3, 400),
    );
    let sample = fx.pipeline.quick_sample(&fx.request()).await.unwrap();
    let job = fx.deps.store.jobs_of_type(BACKFILL_JOB).remove(0);

    let handler = ReviewJobHandler::new(fx.pipeline.clone());
    let err = handler.handle(&job).await.unwrap_err();
    assert_eq!(err.http_status(), Some(400));

    let run = fx.deps.store.run(sample.id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.stage, stage::FAILED);
    assert_eq!(run.imported_count, 510);
    assert!(run.error_message.as_deref().unwrap().contains("400"));
    assert_eq!(fx.deps.store.review_count(), 510);

    // Chunk 3 was never requested
    let offsets: Vec<_> = fx
        .deps
        .task_api
        .posted_requests()
        .into_iter()
        .map(|r| r.offset)
        .collect();
    assert_eq!(offsets, vec![None, Some(10)]);
}

#[tokio::test(start_paused = true)]
async fn backfill_of_a_finished_run_does_nothing() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(30, Utc::now())));
    fx.pipeline.quick_sample(&fx.request()).await.unwrap();

    let job = fx.deps.store.jobs_of_type(BACKFILL_JOB).remove(0);
    let ReviewJob::Backfill(request) = ReviewJob::from_job(&job).unwrap() else {
        panic!("expected a backfill job");
    };
    fx.pipeline.backfill(&request).await.unwrap();
    let posted = fx.deps.task_api.posted_requests().len();

    let again = fx.pipeline.backfill(&request).await.unwrap();
    assert_eq!(again.status, RunStatus::Completed);
    assert_eq!(again.imported_count, 30);
    assert_eq!(fx.deps.task_api.posted_requests().len(), posted);
}

#[tokio::test(start_paused = true)]
async fn incremental_imports_only_reviews_past_the_watermark() {
    let newest = Utc::now() - Duration::days(1);
    let existing = review_dataset(5, newest);
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(existing.clone()));
    let request = fx.request();
    fx.pipeline.quick_sample(&request).await.unwrap();

    let mut reviews = existing;
    reviews.push(review_json("new-1", "Ann", 5.0, "Even better now", newest + Duration::hours(1)));
    reviews.push(review_json("new-2", "Bo", 4.0, "Solid", newest + Duration::hours(2)));
    reviews.push(json!({"review_id": "undated", "profile_name": "Cy", "review_text": "?"}));
    fx.deps.task_api.set_reviews(reviews);

    let run = fx.pipeline.incremental(&request).await.unwrap();

    assert_eq!(run.phase, SyncPhase::Incremental);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.imported_count, 2);
    assert_eq!(fx.deps.store.review_count(), 7);

    let last = fx.deps.task_api.posted_requests().pop().unwrap();
    assert_eq!(last.sort_by.as_deref(), Some("newest"));
    assert_eq!(last.depth, PipelineConfig::default().incremental_depth);
}

#[tokio::test(start_paused = true)]
async fn incremental_with_nothing_new_completes_empty() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(5, Utc::now())));
    let request = fx.request();
    let first = fx.pipeline.quick_sample(&request).await.unwrap();

    let run = fx.pipeline.incremental(&request).await.unwrap();

    assert_ne!(run.id, first.id);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.imported_count, 0);
    assert_eq!(run.total_available, Some(0));
    assert_eq!(run.progress_percent, 100);
}

#[tokio::test(start_paused = true)]
async fn incremental_without_history_imports_everything_returned() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(4, Utc::now())));

    let run = fx.pipeline.incremental(&fx.request()).await.unwrap();

    assert_eq!(run.imported_count, 4);
}

#[tokio::test(start_paused = true)]
async fn second_import_of_the_same_reviews_is_skipped() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(6, Utc::now())));
    let request = fx.request();

    let first = fx.pipeline.quick_sample(&request).await.unwrap();
    let second = fx.pipeline.quick_sample(&request).await.unwrap();

    assert_eq!(first.imported_count, 6);
    assert_eq!(second.imported_count, 0);
    assert_eq!(second.skipped_count, 6);
    assert_eq!(fx.deps.store.review_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn task_that_never_finishes_times_out() {
    let fx = PipelineFixture::new(MockTaskApi::new().never_finishing());

    let err = fx.pipeline.quick_sample(&fx.request()).await.unwrap_err();
    assert!(matches!(err, SyncError::PollTimeout { attempts: 5, .. }));

    let runs = fx.deps.store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].stage, stage::FAILED);
    assert!(runs[0].error_message.as_deref().unwrap().contains("not ready"));
    // Polling moved progress through its window before giving up
    assert_eq!(runs[0].progress_percent, 10);
}

#[tokio::test(start_paused = true)]
async fn remote_task_failure_fails_the_run() {
    let fx = PipelineFixture::new(
        MockTaskApi::new()
            .with_reviews(review_dataset(5, Utc::now()))
            .with_task_failure(40501, "Invalid Field"),
    );

    let err = fx.pipeline.incremental(&fx.request()).await.unwrap_err();
    assert!(matches!(err, SyncError::TaskFailed { status_code: 40501, .. }));

    let runs = fx.deps.store.runs();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].error_message.as_deref().unwrap().contains("Invalid Field"));
    assert_eq!(fx.deps.store.review_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_batch_write_is_counted_not_raised() {
    let fx = PipelineFixture::with_config(
        MockTaskApi::new().with_reviews(review_dataset(8, Utc::now())),
        PipelineConfig {
            import_batch_size: 5,
            ..test_pipeline_config()
        },
    );
    fx.deps.store.fail_next_review_writes(1);

    let run = fx.pipeline.quick_sample(&fx.request()).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.error_count, 5);
    assert_eq!(run.imported_count, 3);
    assert_eq!(fx.deps.store.review_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn service_rejects_bad_input_before_any_io() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(3, Utc::now())));
    let service = ReviewSyncService::new(fx.pipeline.clone());

    let err = service
        .start_phase1(OwnerId::new(), "ftp://example.com/place", BUSINESS)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = service
        .start_phase3(OwnerId::nil(), PLACE_URL, BUSINESS)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    assert!(fx.deps.store.runs().is_empty());
    assert_eq!(fx.deps.task_api.post_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn service_reports_progress_of_started_runs() {
    let fx = PipelineFixture::new(MockTaskApi::new().with_reviews(review_dataset(3, Utc::now())));
    let service = ReviewSyncService::new(fx.pipeline.clone());

    let run_id = service
        .start_phase1(OwnerId::new(), PLACE_URL, BUSINESS)
        .await
        .unwrap();

    let run = service.get_progress(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.imported_count, 3);
}

#[tokio::test(start_paused = true)]
async fn service_returns_the_run_id_of_a_failed_import() {
    let fx = PipelineFixture::new(MockTaskApi::new().never_finishing());
    let service = ReviewSyncService::new(fx.pipeline.clone());

    let run_id = service
        .start_phase1(OwnerId::new(), PLACE_URL, BUSINESS)
        .await
        .unwrap();

    let run = service.get_progress(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.as_deref().unwrap().contains("not ready"));

    let run_id = service
        .start_phase3(OwnerId::new(), PLACE_URL, BUSINESS)
        .await
        .unwrap();
    let run = service.get_progress(run_id).await.unwrap().unwrap();
    assert_eq!(run.phase, SyncPhase::Incremental);
    assert_eq!(run.status, RunStatus::Failed);
}
