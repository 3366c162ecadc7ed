use thiserror::Error;

/// Errors returned by the DataForSEO client.
#[derive(Debug, Error)]
pub enum TaskApiError {
    /// Transport-level failure (connect, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx HTTP response.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The API answered 2xx but refused to create the task.
    #[error("task rejected with status {status_code}: {message}")]
    TaskRejected { status_code: i64, message: String },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TaskApiError {
    /// HTTP status of the failed request, when one was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            TaskApiError::Api { status, .. } => Some(*status),
            TaskApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for connect/timeout failures where no response arrived.
    pub fn is_network(&self) -> bool {
        match self {
            TaskApiError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskApiError>;
