pub mod activities;
pub mod commands;
pub mod handler;
pub mod models;
pub mod service;

pub use activities::{ImportPipeline, PipelineConfig};
pub use commands::{BackfillRequest, ReviewJob, SyncRequest};
pub use handler::ReviewJobHandler;
pub use service::ReviewSyncService;
