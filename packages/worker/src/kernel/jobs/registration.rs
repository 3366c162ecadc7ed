//! Worker registration and liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "worker_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    Busy,
    Offline,
}

impl WorkerState {
    /// Busy when at least one job is executing.
    pub fn for_job_count(count: usize) -> Self {
        if count == 0 {
            WorkerState::Idle
        } else {
            WorkerState::Busy
        }
    }
}

/// One row of the worker registry.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub id: WorkerId,
    pub hostname: String,
    pub max_concurrency: i32,
    pub current_job_count: i32,
    pub status: WorkerState,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl WorkerRegistration {
    pub fn new(id: WorkerId, hostname: impl Into<String>, max_concurrency: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            hostname: hostname.into(),
            max_concurrency: i32::try_from(max_concurrency).unwrap_or(i32::MAX),
            current_job_count: 0,
            status: WorkerState::Idle,
            last_heartbeat: now,
            started_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_follows_job_count() {
        assert_eq!(WorkerState::for_job_count(0), WorkerState::Idle);
        assert_eq!(WorkerState::for_job_count(3), WorkerState::Busy);
    }

    #[test]
    fn test_new_registration_is_idle() {
        let reg = WorkerRegistration::new(WorkerId::new(), "host-a", 5);
        assert_eq!(reg.status, WorkerState::Idle);
        assert_eq!(reg.max_concurrency, 5);
        assert_eq!(reg.current_job_count, 0);
    }
}
