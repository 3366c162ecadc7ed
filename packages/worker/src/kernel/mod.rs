//! Kernel module - worker infrastructure and dependencies.

pub mod circuit_breaker;
pub mod deps;
pub mod jobs;
pub mod retry;
pub mod scheduled_tasks;
pub mod stores;
pub mod task_client;
pub mod test_dependencies;
pub mod traits;

pub use circuit_breaker::{CircuitBreakerOptions, CircuitBreakers, CircuitSnapshot, CircuitState};
pub use deps::ServerDeps;
pub use jobs::{JobHandler, WorkerConfig, WorkerPool, WorkerStatus};
pub use retry::{api_retry, database_retry, execute_with_retry, extraction_api_retry, RetryOptions};
pub use scheduled_tasks::{start_scheduler, MaintenanceConfig};
pub use stores::{MemoryStore, PostgresStore};
pub use task_client::RemoteTaskClient;
pub use test_dependencies::{MockTaskApi, TestDependencies};
pub use traits::*;
