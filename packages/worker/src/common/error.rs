//! Typed errors for the review worker.
//!
//! Every failure the pipeline or worker can surface is a `SyncError`. The
//! retry profiles and the worker's failure handling work off
//! [`SyncError::classification`] rather than matching variants ad hoc.

use dataforseo_client::TaskApiError;
use thiserror::Error;

use super::entity_ids::SyncRunId;

/// DataForSEO top-level code for "rate limit per minute exceeded".
const TASK_API_RATE_LIMITED: i64 = 40202;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store could not be reached. Transient.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    /// Store rejected the write (constraint, bad data). Not transient.
    #[error("datastore rejected write: {0}")]
    Rejected(String),

    #[error("extraction API error: {0}")]
    Api(#[from] TaskApiError),

    /// The remote task itself reported failure.
    #[error("remote task {task_id} failed with status {status_code}: {message}")]
    TaskFailed {
        task_id: String,
        status_code: i64,
        message: String,
    },

    #[error("remote task {task_id} not ready after {attempts} polls")]
    PollTimeout { task_id: String, attempts: u32 },

    #[error("circuit open for {operation}")]
    CircuitOpen { operation: String },

    #[error("unsupported job type: {0}")]
    UnknownJobType(String),

    #[error("invalid job payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("sync run not found: {0}")]
    RunNotFound(SyncRunId),
}

/// Coarse classification used for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Transient,
    TerminalRemote,
    Timeout,
    CircuitOpen,
    Permanent,
}

impl SyncError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            SyncError::Validation(_)
            | SyncError::UnknownJobType(_)
            | SyncError::InvalidPayload(_) => ErrorClass::Validation,
            SyncError::Database(e) if is_transient_sqlx(e) => ErrorClass::Transient,
            SyncError::Database(_) | SyncError::Rejected(_) | SyncError::RunNotFound(_) => {
                ErrorClass::Permanent
            }
            SyncError::Unavailable(_) => ErrorClass::Transient,
            SyncError::Api(e) if is_transient_api(e) => ErrorClass::Transient,
            SyncError::Api(e) if e.http_status().is_some_and(|s| (400..500).contains(&s)) => {
                ErrorClass::Validation
            }
            SyncError::Api(_) => ErrorClass::Permanent,
            SyncError::TaskFailed { .. } => ErrorClass::TerminalRemote,
            SyncError::PollTimeout { .. } => ErrorClass::Timeout,
            SyncError::CircuitOpen { .. } => ErrorClass::CircuitOpen,
        }
    }

    /// HTTP status of the underlying API failure, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::Api(e) => e.http_status(),
            _ => None,
        }
    }

    /// True for connection/timeout-class datastore failures.
    pub fn is_transient_db(&self) -> bool {
        match self {
            SyncError::Database(e) => is_transient_sqlx(e),
            SyncError::Unavailable(_) => true,
            _ => false,
        }
    }

    /// True for 5xx, 429 and network-level API failures.
    pub fn is_transient_api(&self) -> bool {
        match self {
            SyncError::Api(e) => is_transient_api(e),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            matches!(
                code.as_ref(),
                "53300" | // too many connections
                "40001" | // serialization failure
                "40P01" | // deadlock detected
                "08006" | // connection failure
                "08001" | // unable to connect
                "57P03" // database starting up
            )
        }),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

fn is_transient_api(err: &TaskApiError) -> bool {
    match err {
        TaskApiError::TaskRejected { status_code, .. } => {
            *status_code == TASK_API_RATE_LIMITED || *status_code >= 50000
        }
        _ => match err.http_status() {
            Some(status) => status >= 500 || status == 429,
            None => err.is_network(),
        },
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> SyncError {
        SyncError::Api(TaskApiError::Api {
            status,
            message: String::new(),
        })
    }

    #[test]
    fn test_http_status_classes() {
        assert_eq!(api(500).classification(), ErrorClass::Transient);
        assert_eq!(api(503).classification(), ErrorClass::Transient);
        assert_eq!(api(429).classification(), ErrorClass::Transient);
        assert_eq!(api(400).classification(), ErrorClass::Validation);
        assert_eq!(api(404).classification(), ErrorClass::Validation);
    }

    #[test]
    fn test_rate_limited_task_rejection_is_transient() {
        let err = SyncError::Api(TaskApiError::TaskRejected {
            status_code: TASK_API_RATE_LIMITED,
            message: "Rate limit".into(),
        });
        assert!(err.is_transient_api());

        let err = SyncError::Api(TaskApiError::TaskRejected {
            status_code: 40501,
            message: "Invalid Field".into(),
        });
        assert!(!err.is_transient_api());
    }

    #[test]
    fn test_db_classes() {
        assert!(SyncError::Database(sqlx::Error::PoolTimedOut).is_transient_db());
        assert!(SyncError::Unavailable("down".into()).is_transient_db());
        assert!(!SyncError::Database(sqlx::Error::RowNotFound).is_transient_db());
        assert!(!SyncError::Validation("bad".into()).is_transient_db());
    }

    #[test]
    fn test_remote_terminal_classes() {
        let failed = SyncError::TaskFailed {
            task_id: "t".into(),
            status_code: 40501,
            message: "x".into(),
        };
        assert_eq!(failed.classification(), ErrorClass::TerminalRemote);

        let timeout = SyncError::PollTimeout {
            task_id: "t".into(),
            attempts: 60,
        };
        assert_eq!(timeout.classification(), ErrorClass::Timeout);
    }
}
