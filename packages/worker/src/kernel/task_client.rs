//! Resilient access to the extraction API.
//!
//! Every call goes through the circuit breaker for its operation
//! (`"<path>:task_post"` / `"<path>:task_get"`), and inside the breaker through
//! the extraction retry profile.

use std::sync::Arc;

use async_trait::async_trait;
use dataforseo_client::{DataForSeoClient, TaskRequest, TaskStatus};
use tracing::debug;

use super::circuit_breaker::{CircuitBreakerOptions, CircuitBreakers};
use super::retry::extraction_api_retry;
use super::traits::RemoteTaskApi;
use crate::common::Result;

#[async_trait]
impl RemoteTaskApi for DataForSeoClient {
    async fn post_task(&self, path: &str, request: &TaskRequest) -> Result<String> {
        Ok(DataForSeoClient::post_task(self, path, request).await?)
    }

    async fn get_task(&self, path: &str, task_id: &str) -> Result<TaskStatus> {
        Ok(DataForSeoClient::get_task(self, path, task_id).await?)
    }
}

pub fn post_operation(path: &str) -> String {
    format!("{}:task_post", path)
}

pub fn get_operation(path: &str) -> String {
    format!("{}:task_get", path)
}

pub struct RemoteTaskClient {
    api: Arc<dyn RemoteTaskApi>,
    breakers: CircuitBreakers,
    options: CircuitBreakerOptions,
}

impl RemoteTaskClient {
    pub fn new(api: Arc<dyn RemoteTaskApi>, breakers: CircuitBreakers) -> Self {
        Self {
            api,
            breakers,
            options: CircuitBreakerOptions::default().with_retry(extraction_api_retry()),
        }
    }

    pub fn with_options(mut self, options: CircuitBreakerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Create a remote task. Returns the provider's task id.
    pub async fn submit_task(&self, path: &str, request: &TaskRequest) -> Result<String> {
        let task_id = self
            .breakers
            .execute(
                &post_operation(path),
                || self.api.post_task(path, request),
                &self.options,
            )
            .await?;
        debug!(task_id = %task_id, depth = request.depth, offset = ?request.offset, "Submitted task");
        Ok(task_id)
    }

    /// Read a task once.
    pub async fn fetch_result(&self, path: &str, task_id: &str) -> Result<TaskStatus> {
        self.breakers
            .execute(
                &get_operation(path),
                || self.api.get_task(path, task_id),
                &self.options,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SyncError;
    use crate::kernel::circuit_breaker::CircuitState;
    use crate::kernel::test_dependencies::MockTaskApi;

    const PATH: &str = "business_data/google/reviews";

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_within_one_call() {
        let api = Arc::new(MockTaskApi::new().with_post_failures(&[503, 502]));
        let client = RemoteTaskClient::new(api.clone(), CircuitBreakers::new());

        let task_id = client
            .submit_task(PATH, &TaskRequest::new("Joe's", 10))
            .await
            .unwrap();

        assert!(!task_id.is_empty());
        assert_eq!(api.post_attempts(), 3);
        assert_eq!(
            client.breakers().state(&post_operation(PATH)),
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let api = Arc::new(MockTaskApi::new().with_post_failures(&[401]));
        let client = RemoteTaskClient::new(api.clone(), CircuitBreakers::new());

        let err = client
            .submit_task(PATH, &TaskRequest::new("Joe's", 10))
            .await
            .unwrap_err();

        assert_eq!(err.http_status(), Some(401));
        assert_eq!(api.post_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_outages_open_the_circuit() {
        let api = Arc::new(MockTaskApi::new().with_post_failures(&[500; 20]));
        let client = RemoteTaskClient::new(api.clone(), CircuitBreakers::new()).with_options(
            CircuitBreakerOptions {
                failure_threshold: 2,
                ..CircuitBreakerOptions::default()
            }
            .with_retry(extraction_api_retry().with_max_attempts(2)),
        );

        for _ in 0..2 {
            let _ = client.submit_task(PATH, &TaskRequest::new("Joe's", 10)).await;
        }
        assert_eq!(api.post_attempts(), 4);

        let err = client
            .submit_task(PATH, &TaskRequest::new("Joe's", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CircuitOpen { .. }));
        assert_eq!(api.post_attempts(), 4);

        // Reads have their own circuit
        assert_eq!(
            client.breakers().state(&get_operation(PATH)),
            CircuitState::Closed
        );
    }
}
