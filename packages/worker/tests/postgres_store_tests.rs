//! PostgresStore against a real database. Needs Docker:
//! `cargo test --test postgres_store_tests -- --ignored`

mod common;

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use common::*;
use review_worker::common::{OwnerId, WorkerId};
use review_worker::domains::reviews::models::{
    ImportedRecord, RunStatus, SyncPhase, SyncRun, GOOGLE_SOURCE,
};
use review_worker::kernel::jobs::{JobPriority, NewJob, WorkerRegistration, WorkerState};
use review_worker::kernel::{JobQueue, PostgresStore, ReviewStore, SyncRunStore, WorkerRegistry};

async fn store() -> PostgresStore {
    PostgresStore::new(test_pool().await.expect("test database"))
}

/// Job types are unique per test so tests sharing the database never claim
/// each other's jobs.
fn job_type() -> String {
    format!("test.{}", Uuid::new_v4())
}

fn new_job(job_type: &str, priority: JobPriority, key: Option<&str>) -> NewJob {
    NewJob {
        job_type: job_type.to_string(),
        payload: json!({"n": 1}),
        priority,
        idempotency_key: key.map(str::to_string),
    }
}

fn record(source_url: &str, external_id: &str, hours_ago: i64) -> ImportedRecord {
    let now = Utc::now();
    ImportedRecord {
        source: GOOGLE_SOURCE.to_string(),
        external_id: external_id.to_string(),
        owner_id: OwnerId::new(),
        source_url: source_url.to_string(),
        author_name: "Ann".to_string(),
        rating: 4.0,
        text: Some("Good".to_string()),
        posted_at: Some(now - chrono::Duration::hours(hours_ago)),
        raw_payload: json!({"review_id": external_id}),
        imported_at: now,
        updated_at: now,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn enqueue_is_idempotent_per_key() {
    let store = store().await;
    let job_type = job_type();
    let key = format!("phase2:{}", Uuid::new_v4());

    let first = store
        .enqueue(new_job(&job_type, JobPriority::Low, Some(&key)))
        .await
        .unwrap();
    let second = store
        .enqueue(new_job(&job_type, JobPriority::Low, Some(&key)))
        .await
        .unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.job_id(), second.job_id());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_claims_never_share_a_job() {
    let store = store().await;
    let job_type = job_type();
    for _ in 0..10 {
        store
            .enqueue(new_job(&job_type, JobPriority::Normal, None))
            .await
            .unwrap();
    }

    let types = vec![job_type.clone()];
    let claims = (0..10).map(|_| {
        let store = store.clone();
        let types = types.clone();
        tokio::spawn(async move {
            store
                .claim_next(WorkerId::new(), &types, Duration::from_secs(60))
                .await
                .unwrap()
        })
    });

    let mut ids = HashSet::new();
    for claim in claims {
        if let Some(job) = claim.await.unwrap() {
            assert!(ids.insert(job.id), "job {} claimed twice", job.id);
        }
    }
    assert_eq!(ids.len(), 10);
    assert!(store
        .claim_next(WorkerId::new(), &types, Duration::from_secs(60))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn claims_follow_priority_and_expired_leases_return() {
    let store = store().await;
    let job_type = job_type();
    let types = vec![job_type.clone()];
    store
        .enqueue(new_job(&job_type, JobPriority::Low, None))
        .await
        .unwrap();
    let urgent = store
        .enqueue(new_job(&job_type, JobPriority::Critical, None))
        .await
        .unwrap();

    let claimed = store
        .claim_next(WorkerId::new(), &types, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, urgent.job_id());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(store.release_expired_claims().await.unwrap() >= 1);

    let again = store
        .claim_next(WorkerId::new(), &types, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, urgent.job_id());
    assert_eq!(again.attempts, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn only_the_current_claim_holder_finishes_a_job() {
    let store = store().await;
    let job_type = job_type();
    let types = vec![job_type.clone()];
    let job_id = store
        .enqueue(new_job(&job_type, JobPriority::Normal, None))
        .await
        .unwrap()
        .job_id();

    let stale = WorkerId::new();
    store
        .claim_next(stale, &types, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.release_expired_claims().await.unwrap();

    let current = WorkerId::new();
    let job = store
        .claim_next(current, &types, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.id, job_id);

    assert!(!store.mark_failed(job_id, stale, "stale failure").await.unwrap());
    assert!(store.mark_succeeded(job_id, current).await.unwrap());
    assert!(!store.mark_failed(job_id, current, "late").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn run_progress_never_moves_backwards() {
    let store = store().await;
    let mut run = SyncRun::new(
        OwnerId::new(),
        "https://maps.example.com/place/pg",
        "Joe's Pizza",
        SyncPhase::QuickSample,
    );
    store.create_run(&run).await.unwrap();

    run.advance_progress(60.0);
    store.update_run(&run).await.unwrap();

    let mut stale = run.clone();
    stale.progress_percent = 20;
    store.update_run(&stale).await.unwrap();

    let stored = store.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.progress_percent, 60);
    assert_eq!(stored.status, RunStatus::Running);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reviews_upsert_by_source_and_external_id() {
    let store = store().await;
    let url = format!("https://maps.example.com/place/{}", Uuid::new_v4());
    let a = format!("a-{}", Uuid::new_v4());
    let b = format!("b-{}", Uuid::new_v4());

    store
        .upsert_reviews(&[record(&url, &a, 5), record(&url, &b, 1)])
        .await
        .unwrap();
    let mut edited = record(&url, &a, 5);
    edited.text = Some("Edited".to_string());
    store.upsert_reviews(&[edited]).await.unwrap();

    let existing = store
        .existing_external_ids(GOOGLE_SOURCE, &[a.clone(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(existing, HashSet::from([a]));

    let latest = store
        .latest_posted_at(GOOGLE_SOURCE, &url)
        .await
        .unwrap()
        .unwrap();
    assert!(Utc::now() - latest < chrono::Duration::hours(2));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn worker_registry_lifecycle() {
    let store = store().await;
    let registration = WorkerRegistration::new(WorkerId::new(), "host-a", 5);

    store.register(&registration).await.unwrap();
    store
        .heartbeat(registration.id, 2, WorkerState::Busy)
        .await
        .unwrap();
    store.mark_offline(registration.id).await.unwrap();

    let pruned = store
        .prune_offline(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert!(pruned >= 1);
}
