// TestDependencies - mock implementations for testing
//
// Provides a scripted extraction API and an in-memory store that can be
// assembled into ServerDeps for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataforseo_client::{ReviewItem, TaskApiError, TaskRequest, TaskStatus};
use serde_json::json;

use super::circuit_breaker::CircuitBreakers;
use super::deps::ServerDeps;
use super::stores::MemoryStore;
use super::traits::RemoteTaskApi;
use crate::common::{Result, SyncError};

// =============================================================================
// Mock Task API
// =============================================================================

/// Build a review item the way the provider returns it.
pub fn review_json(
    review_id: &str,
    author: &str,
    rating: f64,
    text: &str,
    posted_at: DateTime<Utc>,
) -> serde_json::Value {
    json!({
        "review_id": review_id,
        "profile_name": author,
        "rating": {"value": rating, "rating_max": 5.0, "votes_count": 0},
        "review_text": text,
        "timestamp": posted_at.format("%Y-%m-%d %H:%M:%S +00:00").to_string(),
    })
}

/// `count` reviews with ids `r-0000..`, one hour apart, newest last.
pub fn review_dataset(count: usize, newest: DateTime<Utc>) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| {
            let age = chrono::Duration::hours((count - 1 - i) as i64);
            review_json(
                &format!("r-{:04}", i),
                &format!("Reviewer {}", i),
                (i % 5 + 1) as f64,
                &format!("Review number {}", i),
                newest - age,
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
struct MockTask {
    request: TaskRequest,
    polls: u32,
}

pub struct MockTaskApi {
    reviews: Arc<Mutex<Vec<serde_json::Value>>>,
    total_override: Arc<Mutex<Option<i64>>>,
    polls_before_ready: Arc<Mutex<u32>>,
    never_finish: Arc<Mutex<bool>>,
    task_failure: Arc<Mutex<Option<(i64, String)>>>,
    post_failures: Arc<Mutex<VecDeque<u16>>>,
    get_failures: Arc<Mutex<VecDeque<u16>>>,
    post_failures_at: Arc<Mutex<HashMap<u32, u16>>>,
    tasks: Arc<Mutex<HashMap<String, MockTask>>>,
    posted: Arc<Mutex<Vec<TaskRequest>>>,
    post_attempts: AtomicU32,
    get_attempts: AtomicU32,
}

impl Default for MockTaskApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTaskApi {
    pub fn new() -> Self {
        Self {
            reviews: Arc::new(Mutex::new(Vec::new())),
            total_override: Arc::new(Mutex::new(None)),
            polls_before_ready: Arc::new(Mutex::new(0)),
            never_finish: Arc::new(Mutex::new(false)),
            task_failure: Arc::new(Mutex::new(None)),
            post_failures: Arc::new(Mutex::new(VecDeque::new())),
            get_failures: Arc::new(Mutex::new(VecDeque::new())),
            post_failures_at: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            posted: Arc::new(Mutex::new(Vec::new())),
            post_attempts: AtomicU32::new(0),
            get_attempts: AtomicU32::new(0),
        }
    }

    /// Reviews the business has, in provider default order.
    pub fn with_reviews(self, reviews: Vec<serde_json::Value>) -> Self {
        *self.reviews.lock().unwrap() = reviews;
        self
    }

    /// Report this total instead of the dataset size.
    pub fn with_total(self, total: i64) -> Self {
        *self.total_override.lock().unwrap() = Some(total);
        self
    }

    /// Each task answers "processing" this many times before it is ready.
    pub fn with_polls_before_ready(self, polls: u32) -> Self {
        *self.polls_before_ready.lock().unwrap() = polls;
        self
    }

    pub fn never_finishing(self) -> Self {
        *self.never_finish.lock().unwrap() = true;
        self
    }

    /// Every task ends in this provider failure.
    pub fn with_task_failure(self, status_code: i64, message: &str) -> Self {
        *self.task_failure.lock().unwrap() = Some((status_code, message.to_string()));
        self
    }

    /// The next `post_task` calls fail with these HTTP statuses, in order.
    pub fn with_post_failures(self, statuses: &[u16]) -> Self {
        self.post_failures.lock().unwrap().extend(statuses);
        self
    }

    /// The next `get_task` calls fail with these HTTP statuses, in order.
    pub fn with_get_failures(self, statuses: &[u16]) -> Self {
        self.get_failures.lock().unwrap().extend(statuses);
        self
    }

    /// The `attempt`-th `post_task` call (1-based, failed calls counted)
    /// fails with this HTTP status.
    pub fn with_post_failure_at(self, attempt: u32, status: u16) -> Self {
        self.post_failures_at.lock().unwrap().insert(attempt, status);
        self
    }

    /// Replace the dataset after construction.
    pub fn set_reviews(&self, reviews: Vec<serde_json::Value>) {
        *self.reviews.lock().unwrap() = reviews;
    }

    /// Requests of all successful `post_task` calls
    pub fn posted_requests(&self) -> Vec<TaskRequest> {
        self.posted.lock().unwrap().clone()
    }

    /// All `post_task` calls, failed ones included
    pub fn post_attempts(&self) -> u32 {
        self.post_attempts.load(Ordering::SeqCst)
    }

    pub fn get_attempts(&self) -> u32 {
        self.get_attempts.load(Ordering::SeqCst)
    }

    fn injected_failure(queue: &Mutex<VecDeque<u16>>) -> Option<SyncError> {
        queue.lock().unwrap().pop_front().map(|status| {
            SyncError::Api(TaskApiError::Api {
                status,
                message: format!("injected {}", status),
            })
        })
    }

    fn result_for(&self, request: &TaskRequest) -> TaskStatus {
        let mut reviews = self.reviews.lock().unwrap().clone();
        let total = self
            .total_override
            .lock()
            .unwrap()
            .unwrap_or(reviews.len() as i64);

        if request.sort_by.as_deref() == Some("newest") {
            reviews.sort_by_key(|r| {
                std::cmp::Reverse(ReviewItem::from_value(r.clone()).posted_at())
            });
        }

        let items: Vec<ReviewItem> = reviews
            .into_iter()
            .skip(request.offset.unwrap_or(0) as usize)
            .take(request.depth as usize)
            .map(ReviewItem::from_value)
            .collect();

        if items.is_empty() {
            TaskStatus::Empty {
                total_available: Some(total),
            }
        } else {
            TaskStatus::Ready {
                total_available: Some(total),
                items,
            }
        }
    }
}

#[async_trait]
impl RemoteTaskApi for MockTaskApi {
    async fn post_task(&self, _path: &str, request: &TaskRequest) -> Result<String> {
        let attempt = self.post_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = Self::injected_failure(&self.post_failures) {
            return Err(err);
        }
        if let Some(status) = self.post_failures_at.lock().unwrap().remove(&attempt) {
            return Err(SyncError::Api(TaskApiError::Api {
                status,
                message: format!("injected {} on attempt {}", status, attempt),
            }));
        }

        let mut tasks = self.tasks.lock().unwrap();
        let task_id = format!("task-{:04}", tasks.len() + 1);
        tasks.insert(
            task_id.clone(),
            MockTask {
                request: request.clone(),
                polls: 0,
            },
        );
        self.posted.lock().unwrap().push(request.clone());
        Ok(task_id)
    }

    async fn get_task(&self, _path: &str, task_id: &str) -> Result<TaskStatus> {
        self.get_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::injected_failure(&self.get_failures) {
            return Err(err);
        }

        let request = {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks.get_mut(task_id).ok_or_else(|| {
                SyncError::Api(TaskApiError::Api {
                    status: 404,
                    message: format!("unknown task {}", task_id),
                })
            })?;

            if *self.never_finish.lock().unwrap()
                || task.polls < *self.polls_before_ready.lock().unwrap()
            {
                task.polls += 1;
                return Ok(TaskStatus::Processing);
            }
            task.request.clone()
        };

        if let Some((status_code, message)) = self.task_failure.lock().unwrap().clone() {
            return Ok(TaskStatus::Failed {
                status_code,
                message,
            });
        }

        Ok(self.result_for(&request))
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// In-memory store plus mock API, wired the way the binary wires Postgres
/// and the real client.
pub struct TestDependencies {
    pub store: Arc<MemoryStore>,
    pub task_api: Arc<MockTaskApi>,
    pub breakers: CircuitBreakers,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            task_api: Arc::new(MockTaskApi::new()),
            breakers: CircuitBreakers::new(),
        }
    }

    pub fn with_task_api(mut self, task_api: MockTaskApi) -> Self {
        self.task_api = Arc::new(task_api);
        self
    }

    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::from_store(
            self.store.clone(),
            self.task_api.clone(),
            self.breakers.clone(),
        )
    }
}
