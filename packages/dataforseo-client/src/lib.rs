//! Pure DataForSEO REST API client.
//!
//! A minimal client for the DataForSEO task-based endpoints. Supports posting a
//! task and reading it back until it is ready. Endpoint families are addressed by
//! path (e.g. `business_data/google/reviews`), so one client serves all of them.
//!
//! # Example
//!
//! ```rust,ignore
//! use dataforseo_client::{DataForSeoClient, TaskRequest, TaskStatus};
//!
//! let client = DataForSeoClient::new("login".into(), "password".into());
//! let path = "business_data/google/reviews";
//!
//! let task_id = client.post_task(path, &TaskRequest::new("Joe's Pizza", 10)).await?;
//! match client.get_task(path, &task_id).await? {
//!     TaskStatus::Ready { items, .. } => println!("{} reviews", items.len()),
//!     other => println!("{:?}", other),
//! }
//! ```

pub mod error;
pub mod types;

pub use error::{Result, TaskApiError};
pub use types::{
    ApiResponse, Rating, ReviewItem, ReviewsResult, TaskEntry, TaskRequest, TaskStatus,
    STATUS_NO_RESULTS, STATUS_OK, STATUS_TASK_CREATED, STATUS_TASK_HANDED, STATUS_TASK_IN_QUEUE,
};

const BASE_URL: &str = "https://api.dataforseo.com/v3";

pub struct DataForSeoClient {
    client: reqwest::Client,
    login: String,
    password: String,
    base_url: String,
}

impl DataForSeoClient {
    pub fn new(login: String, password: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            login,
            password,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different host (sandbox, local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create a task. Returns the task id assigned by the API.
    pub async fn post_task(&self, path: &str, request: &TaskRequest) -> Result<String> {
        let url = self.endpoint(path, "task_post");
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.login, Some(&self.password))
            .json(&[request])
            .send()
            .await?;

        let envelope = Self::read_envelope(resp).await?;
        let task = envelope
            .tasks
            .into_iter()
            .next()
            .ok_or_else(|| TaskApiError::MalformedResponse("task_post returned no tasks".into()))?;

        match task.status_code {
            STATUS_TASK_CREATED | STATUS_OK => {
                tracing::debug!(task_id = %task.id, path, "Task created");
                Ok(task.id)
            }
            code => Err(TaskApiError::TaskRejected {
                status_code: code,
                message: task.status_message,
            }),
        }
    }

    /// Read a task once. Callers decide how often to poll.
    pub async fn get_task(&self, path: &str, task_id: &str) -> Result<TaskStatus> {
        let url = self.endpoint(path, &format!("task_get/{}", task_id));
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .await?;

        let envelope = Self::read_envelope(resp).await?;
        let task = envelope
            .tasks
            .into_iter()
            .next()
            .ok_or_else(|| TaskApiError::MalformedResponse("task_get returned no tasks".into()))?;

        classify_task(task)
    }

    /// `<base>/<path>/<action>`, e.g. `.../business_data/google/reviews/task_get/<id>`.
    fn endpoint(&self, path: &str, action: &str) -> String {
        format!("{}/{}/{}", self.base_url, path.trim_matches('/'), action)
    }

    async fn read_envelope(resp: reqwest::Response) -> Result<ApiResponse> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TaskApiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: ApiResponse = resp.json().await?;
        if envelope.status_code != STATUS_OK {
            return Err(TaskApiError::TaskRejected {
                status_code: envelope.status_code,
                message: envelope.status_message,
            });
        }
        Ok(envelope)
    }
}

/// Map a task entry onto the polling outcome.
pub fn classify_task(task: TaskEntry) -> Result<TaskStatus> {
    match task.status_code {
        STATUS_TASK_CREATED | STATUS_TASK_HANDED | STATUS_TASK_IN_QUEUE => {
            Ok(TaskStatus::Processing)
        }
        STATUS_NO_RESULTS => Ok(TaskStatus::Empty {
            total_available: Some(0),
        }),
        STATUS_OK => {
            let result = task.result.and_then(|r| r.into_iter().next());
            let Some(result) = result else {
                return Ok(TaskStatus::Empty {
                    total_available: None,
                });
            };

            let items: Vec<ReviewItem> = result
                .items
                .unwrap_or_default()
                .into_iter()
                .map(ReviewItem::from_value)
                .collect();

            if items.is_empty() {
                Ok(TaskStatus::Empty {
                    total_available: result.reviews_count,
                })
            } else {
                Ok(TaskStatus::Ready {
                    total_available: result.reviews_count,
                    items,
                })
            }
        }
        code => Ok(TaskStatus::Failed {
            status_code: code,
            message: task.status_message,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: serde_json::Value) -> TaskEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let client = DataForSeoClient::new("login".into(), "secret".into());
        let path = "business_data/google/reviews";
        assert_eq!(
            client.endpoint(path, "task_post"),
            "https://api.dataforseo.com/v3/business_data/google/reviews/task_post"
        );
        assert_eq!(
            client.endpoint(path, "task_get/07101234"),
            "https://api.dataforseo.com/v3/business_data/google/reviews/task_get/07101234"
        );

        let sandbox = client.with_base_url("https://sandbox.dataforseo.com/v3/");
        assert_eq!(
            sandbox.endpoint("/business_data/google/reviews/", "task_post"),
            "https://sandbox.dataforseo.com/v3/business_data/google/reviews/task_post"
        );
    }

    #[test]
    fn test_queued_task_is_processing() {
        for code in [STATUS_TASK_CREATED, STATUS_TASK_HANDED, STATUS_TASK_IN_QUEUE] {
            let status = classify_task(entry(json!({"id": "t1", "status_code": code}))).unwrap();
            assert!(matches!(status, TaskStatus::Processing));
        }
    }

    #[test]
    fn test_ready_task_parses_items() {
        let status = classify_task(entry(json!({
            "id": "t1",
            "status_code": 20000,
            "status_message": "Ok.",
            "result": [{
                "reviews_count": 42,
                "items_count": 1,
                "items": [{
                    "review_id": "abc",
                    "profile_name": "Dana",
                    "rating": {"value": 4.0, "rating_max": 5.0, "votes_count": 0},
                    "review_text": "Great crust",
                    "timestamp": "2024-03-01 10:00:00 +00:00",
                    "owner_answer": null
                }]
            }]
        })))
        .unwrap();

        match status {
            TaskStatus::Ready {
                total_available,
                items,
            } => {
                assert_eq!(total_available, Some(42));
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].review_id.as_deref(), Some("abc"));
                assert_eq!(items[0].rating_value(), Some(4.0));
                assert!(items[0].posted_at().is_some());
                assert_eq!(items[0].raw["profile_name"], "Dana");
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_no_results_is_empty_not_error() {
        let status = classify_task(entry(json!({"id": "t1", "status_code": 40102}))).unwrap();
        assert!(matches!(
            status,
            TaskStatus::Empty {
                total_available: Some(0)
            }
        ));

        let status = classify_task(entry(json!({
            "id": "t1",
            "status_code": 20000,
            "result": [{"reviews_count": 0, "items": null}]
        })))
        .unwrap();
        assert!(matches!(status, TaskStatus::Empty { .. }));
    }

    #[test]
    fn test_unknown_code_is_failed() {
        let status = classify_task(entry(json!({
            "id": "t1",
            "status_code": 40501,
            "status_message": "Invalid Field"
        })))
        .unwrap();
        match status {
            TaskStatus::Failed {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 40501);
                assert_eq!(message, "Invalid Field");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let body = serde_json::to_value(TaskRequest::new("Joe's", 10)).unwrap();
        assert_eq!(body, json!({"keyword": "Joe's", "depth": 10}));

        let body =
            serde_json::to_value(TaskRequest::new("Joe's", 500).with_offset(10).newest_first())
                .unwrap();
        assert_eq!(body["offset"], 10);
        assert_eq!(body["sort_by"], "newest");
    }

    #[test]
    fn test_posted_at_accepts_rfc3339() {
        let item = ReviewItem::from_value(json!({"timestamp": "2024-03-01T10:00:00Z"}));
        assert!(item.posted_at().is_some());

        let item = ReviewItem::from_value(json!({"timestamp": "yesterday"}));
        assert!(item.posted_at().is_none());
    }

    #[test]
    fn test_mistyped_item_keeps_raw_payload() {
        let item = ReviewItem::from_value(json!({"review_id": "r1", "rating": "five stars"}));
        assert_eq!(item.review_id.as_deref(), Some("r1"));
        assert!(item.rating.is_none());
        assert_eq!(item.raw["rating"], "five stars");
    }
}
