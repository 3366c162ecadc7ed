use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::common::WorkerId;
use crate::domains::reviews::activities::{PipelineConfig, PollOptions};
use crate::kernel::jobs::WorkerConfig;
use crate::kernel::scheduled_tasks::MaintenanceConfig;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub dataforseo_login: String,
    pub dataforseo_password: String,
    pub dataforseo_base_url: Option<String>,
    pub max_concurrency: usize,
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub job_lease_secs: u64,
    pub retention_days: i64,
    pub health_port: u16,
    pub sample_size: u32,
    pub chunk_size: u32,
    pub chunk_delay_ms: u64,
    pub task_poll_interval_secs: u64,
    pub task_poll_max_attempts: u32,
    pub incremental_depth: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            dataforseo_login: env::var("DATAFORSEO_LOGIN")
                .context("DATAFORSEO_LOGIN must be set")?,
            dataforseo_password: env::var("DATAFORSEO_PASSWORD")
                .context("DATAFORSEO_PASSWORD must be set")?,
            dataforseo_base_url: env::var("DATAFORSEO_BASE_URL").ok(),
            max_concurrency: var_or("WORKER_MAX_CONCURRENCY", 5)?,
            poll_interval_secs: var_or("WORKER_POLL_INTERVAL_SECS", 5)?,
            heartbeat_interval_secs: var_or("WORKER_HEARTBEAT_INTERVAL_SECS", 30)?,
            shutdown_timeout_secs: var_or("WORKER_SHUTDOWN_TIMEOUT_SECS", 60)?,
            job_lease_secs: var_or("JOB_LEASE_SECS", 600)?,
            retention_days: var_or("RETENTION_DAYS", 30)?,
            health_port: var_or("HEALTH_PORT", 8081)?,
            sample_size: var_or("IMPORT_SAMPLE_SIZE", 10)?,
            chunk_size: var_or("IMPORT_CHUNK_SIZE", 500)?,
            chunk_delay_ms: var_or("IMPORT_CHUNK_DELAY_MS", 2000)?,
            task_poll_interval_secs: var_or("TASK_POLL_INTERVAL_SECS", 10)?,
            task_poll_max_attempts: var_or("TASK_POLL_MAX_ATTEMPTS", 60)?,
            incremental_depth: var_or("INCREMENTAL_DEPTH", 50)?,
        })
    }

    pub fn worker_config(&self, hostname: impl Into<String>) -> WorkerConfig {
        WorkerConfig {
            worker_id: WorkerId::new(),
            hostname: hostname.into(),
            max_concurrency: self.max_concurrency.max(1),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            lease_duration: Duration::from_secs(self.job_lease_secs),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sample_size: self.sample_size,
            chunk_size: self.chunk_size,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            poll: PollOptions {
                interval: Duration::from_secs(self.task_poll_interval_secs),
                max_attempts: self.task_poll_max_attempts,
            },
            incremental_depth: self.incremental_depth,
            ..PipelineConfig::default()
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            retention_days: self.retention_days,
            ..MaintenanceConfig::default()
        }
    }
}

/// Parse `name`, falling back to `default` when unset.
fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
