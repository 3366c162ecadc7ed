//! Review Import Worker
//!
//! Claims review import jobs from the Postgres queue and runs them against the
//! DataForSEO task API until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dataforseo_client::DataForSeoClient;
use review_worker::domains::reviews::{ImportPipeline, ReviewJobHandler};
use review_worker::kernel::{CircuitBreakers, PostgresStore, ServerDeps, WorkerPool};
use review_worker::server::{serve_health, HealthState};
use review_worker::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "worker", about = "Review import worker")]
struct Cli {
    /// Do not run database migrations on startup
    #[arg(long)]
    skip_migrations: bool,

    /// Override WORKER_MAX_CONCURRENCY
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,review_worker=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(max) = cli.max_concurrency {
        config.max_concurrency = max;
    }

    tracing::info!("Starting review import worker");

    // Database setup
    let pool = PgPoolOptions::new()
        .max_connections((config.max_concurrency as u32 + 2).max(5))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    if cli.skip_migrations {
        tracing::info!("Skipping database migrations");
    } else {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        tracing::info!("Database migrations applied");
    }

    // Extraction API
    let mut client = DataForSeoClient::new(
        config.dataforseo_login.clone(),
        config.dataforseo_password.clone(),
    );
    if let Some(base_url) = &config.dataforseo_base_url {
        client = client.with_base_url(base_url.clone());
    }

    let breakers = CircuitBreakers::new();
    let deps = ServerDeps::from_store(
        Arc::new(PostgresStore::new(pool.clone())),
        Arc::new(client),
        breakers.clone(),
    );

    let pipeline = ImportPipeline::new(deps.clone(), config.pipeline_config());
    let handler = Arc::new(ReviewJobHandler::new(pipeline));

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let worker = Arc::new(WorkerPool::new(
        config.worker_config(hostname),
        deps.job_queue.clone(),
        deps.workers.clone(),
        handler,
    ));

    worker.start().await?;
    worker
        .start_maintenance(deps.clone(), config.maintenance_config())
        .await?;

    let health_shutdown = CancellationToken::new();
    let health = tokio::spawn(serve_health(
        HealthState {
            worker: worker.clone(),
            breakers,
            db_pool: Some(pool.clone()),
        },
        config.health_port,
        health_shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    worker.stop().await?;
    health_shutdown.cancel();
    match health.await {
        Ok(Err(e)) => tracing::error!("Health server error: {:#}", e),
        Err(e) => tracing::error!("Health server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    pool.close().await;
    tracing::info!("Worker shut down");
    Ok(())
}
