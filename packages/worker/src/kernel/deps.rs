//! Server dependencies for the import pipeline and worker (using traits for
//! testability)
//!
//! This module provides the central dependency container. Every store and the
//! extraction API sit behind trait objects so tests can swap in memory
//! implementations.

use std::sync::Arc;

use super::circuit_breaker::CircuitBreakers;
use super::task_client::RemoteTaskClient;
use super::traits::{RemoteTaskApi, JobQueue, ReviewStore, SyncRunStore, WorkerRegistry};

#[derive(Clone)]
pub struct ServerDeps {
    pub job_queue: Arc<dyn JobQueue>,
    pub sync_runs: Arc<dyn SyncRunStore>,
    pub reviews: Arc<dyn ReviewStore>,
    pub workers: Arc<dyn WorkerRegistry>,
    /// Extraction API wrapped in retry and circuit breakers
    pub task_client: Arc<RemoteTaskClient>,
}

impl ServerDeps {
    /// Wire every store role to one backend.
    pub fn from_store<S>(
        store: Arc<S>,
        task_api: Arc<dyn RemoteTaskApi>,
        breakers: CircuitBreakers,
    ) -> Self
    where
        S: JobQueue + SyncRunStore + ReviewStore + WorkerRegistry + 'static,
    {
        Self {
            job_queue: store.clone(),
            sync_runs: store.clone(),
            reviews: store.clone(),
            workers: store,
            task_client: Arc::new(RemoteTaskClient::new(task_api, breakers)),
        }
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakers {
        self.task_client.breakers()
    }
}
