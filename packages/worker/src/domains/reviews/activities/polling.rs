//! Wait for a remote task to finish.

use std::time::Duration;

use dataforseo_client::{ReviewItem, TaskStatus};
use tracing::debug;

use super::tracker::RunTracker;
use crate::common::{Result, SyncError};
use crate::kernel::task_client::RemoteTaskClient;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    /// Wait before each read of the task
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

/// Share of the run's progress bar a poll is allowed to fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWindow {
    pub start: f64,
    pub end: f64,
}

impl ProgressWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Position after `attempt` of `max_attempts` unfinished polls.
    pub fn at(&self, attempt: u32, max_attempts: u32) -> f64 {
        if max_attempts == 0 {
            return self.start;
        }
        let fraction = (attempt.min(max_attempts) as f64) / max_attempts as f64;
        self.start + (self.end - self.start) * fraction
    }
}

/// A finished task. `items` is empty for a valid empty result.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub total_available: Option<i64>,
    pub items: Vec<ReviewItem>,
}

/// Read `task_id` until it is terminal. Each unfinished read moves progress
/// through `window`.
pub(crate) async fn poll_until_ready(
    client: &RemoteTaskClient,
    path: &str,
    task_id: &str,
    options: PollOptions,
    window: ProgressWindow,
    tracker: &mut RunTracker,
) -> Result<TaskOutcome> {
    for attempt in 1..=options.max_attempts {
        tokio::time::sleep(options.interval).await;

        match client.fetch_result(path, task_id).await? {
            TaskStatus::Processing => {
                debug!(task_id, attempt, "Task still processing");
                tracker.advance(window.at(attempt, options.max_attempts)).await;
            }
            TaskStatus::Ready {
                total_available,
                items,
            } => {
                return Ok(TaskOutcome {
                    task_id: task_id.to_string(),
                    total_available,
                    items,
                })
            }
            TaskStatus::Empty { total_available } => {
                return Ok(TaskOutcome {
                    task_id: task_id.to_string(),
                    total_available,
                    items: Vec::new(),
                })
            }
            TaskStatus::Failed {
                status_code,
                message,
            } => {
                return Err(SyncError::TaskFailed {
                    task_id: task_id.to_string(),
                    status_code,
                    message,
                })
            }
        }
    }

    Err(SyncError::PollTimeout {
        task_id: task_id.to_string(),
        attempts: options.max_attempts,
    })
}
