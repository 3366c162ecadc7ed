//! Pipeline fixtures over the in-memory store and the scripted task API.

use std::time::Duration;

use review_worker::common::OwnerId;
use review_worker::domains::reviews::activities::PollOptions;
use review_worker::domains::reviews::{ImportPipeline, PipelineConfig, SyncRequest};
use review_worker::kernel::{MockTaskApi, TestDependencies};

pub const PLACE_URL: &str = "https://www.google.com/maps/place/Joes+Pizza";
pub const BUSINESS: &str = "Joe's Pizza";

/// Route test logs through the test writer. Run with
/// `RUST_LOG=debug cargo test -- --nocapture` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Defaults with short waits. Tests run on paused time anyway.
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        chunk_delay: Duration::from_millis(100),
        poll: PollOptions {
            interval: Duration::from_secs(1),
            max_attempts: 5,
        },
        ..PipelineConfig::default()
    }
}

pub struct PipelineFixture {
    pub deps: TestDependencies,
    pub pipeline: ImportPipeline,
}

impl PipelineFixture {
    pub fn new(api: MockTaskApi) -> Self {
        Self::with_config(api, test_pipeline_config())
    }

    pub fn with_config(api: MockTaskApi, config: PipelineConfig) -> Self {
        init_tracing();
        let deps = TestDependencies::new().with_task_api(api);
        let pipeline = ImportPipeline::new(deps.server_deps(), config);
        Self { deps, pipeline }
    }

    pub fn request(&self) -> SyncRequest {
        SyncRequest::new(OwnerId::new(), PLACE_URL, BUSINESS)
    }
}
