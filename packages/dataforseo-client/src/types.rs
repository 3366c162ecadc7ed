use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level request accepted.
pub const STATUS_OK: i64 = 20000;
/// Task created and queued for processing.
pub const STATUS_TASK_CREATED: i64 = 20100;
/// No results for the requested target; a valid, empty outcome.
pub const STATUS_NO_RESULTS: i64 = 40102;
/// Task handed to a processing node.
pub const STATUS_TASK_HANDED: i64 = 40601;
/// Task still waiting in the processing queue.
pub const STATUS_TASK_IN_QUEUE: i64 = 40602;

/// Input for a `task_post` call. One request creates one task.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskRequest {
    pub keyword: String,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    /// Free-form tag echoed back by the API; we store the source URL here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl TaskRequest {
    pub fn new(keyword: impl Into<String>, depth: u32) -> Self {
        Self {
            keyword: keyword.into(),
            depth,
            offset: None,
            sort_by: None,
            tag: None,
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.sort_by = Some("newest".to_string());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Envelope wrapping every API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub status_code: i64,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

/// One task inside an envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    pub status_code: i64,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub result: Option<Vec<ReviewsResult>>,
}

/// Result block of a finished reviews task.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewsResult {
    /// Total reviews the target has, independent of `depth`.
    #[serde(default)]
    pub reviews_count: Option<i64>,
    #[serde(default)]
    pub items_count: Option<i64>,
    #[serde(default)]
    pub items: Option<Vec<serde_json::Value>>,
}

/// Rating block of a review.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Rating {
    pub value: Option<f64>,
    pub rating_max: Option<f64>,
    pub votes_count: Option<i64>,
}

/// A single review from a finished task. `raw` keeps the untouched item.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewItem {
    pub review_id: Option<String>,
    pub profile_name: Option<String>,
    pub rating: Option<Rating>,
    pub review_text: Option<String>,
    /// Format `2023-04-11 09:15:02 +00:00`.
    pub timestamp: Option<String>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl ReviewItem {
    /// Parse an item, keeping the raw JSON. Items whose fields have unexpected
    /// types are kept with only `review_id` and `raw` filled in, so one odd
    /// record never fails the whole task.
    pub fn from_value(value: serde_json::Value) -> Self {
        match serde_json::from_value::<ReviewItem>(value.clone()) {
            Ok(mut item) => {
                item.raw = value;
                item
            }
            Err(e) => {
                tracing::debug!(error = %e, "Review item did not match expected shape");
                ReviewItem {
                    review_id: value
                        .get("review_id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    profile_name: None,
                    rating: None,
                    review_text: None,
                    timestamp: None,
                    raw: value,
                }
            }
        }
    }

    /// Parsed `timestamp`. Falls back to RFC 3339 before giving up.
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        let ts = self.timestamp.as_deref()?.trim();
        DateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S %:z")
            .or_else(|_| DateTime::parse_from_rfc3339(ts))
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    pub fn rating_value(&self) -> Option<f64> {
        self.rating.as_ref().and_then(|r| r.value)
    }
}

/// Outcome of polling a task.
#[derive(Debug, Clone)]
pub enum TaskStatus {
    /// Not finished yet; poll again.
    Processing,
    /// Finished with at least one item.
    Ready {
        total_available: Option<i64>,
        items: Vec<ReviewItem>,
    },
    /// Finished with zero items.
    Empty { total_available: Option<i64> },
    /// Terminal failure reported by the API.
    Failed { status_code: i64, message: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}
