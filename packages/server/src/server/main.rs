// Main entry point for the scrape-and-answer server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::domains::tasks::{register_task_jobs, PostgresTaskStore};
use server_core::kernel::jobs::{JobQueue, JobRegistry, JobWorker, PostgresJobQueue};
use server_core::kernel::scraper::{
    BrowserFetcher, BrowserFetcherConfig, ContentService, StaticFetcher,
};
use server_core::kernel::{BasePageFetcher, OpenAIAnswerModel, ServerDeps};
use server_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting scrape-and-answer server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("configuration loaded");

    // Connect to database
    tracing::info!("connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("migrations complete");

    // Fetch strategies: static always, dynamic only when something may use it
    let static_fetcher: Arc<dyn BasePageFetcher> =
        Arc::new(StaticFetcher::new().context("Failed to build HTTP client")?);
    let dynamic_fetcher: Option<Arc<dyn BasePageFetcher>> =
        if config.use_dynamic_fetch || config.dynamic_fallback_on_insufficient {
            Some(Arc::new(BrowserFetcher::new(BrowserFetcherConfig {
                chrome_executable: config.chrome_executable.clone(),
                ..BrowserFetcherConfig::default()
            })))
        } else {
            None
        };
    let content = ContentService::new(static_fetcher, dynamic_fetcher, config.content_config());

    let ai = OpenAIAnswerModel::new(config.openai_api_key.clone(), config.openai_model.clone())
        .with_base_url(config.openai_base_url.clone());

    let job_queue: Arc<dyn JobQueue> =
        Arc::new(PostgresJobQueue::new(pool.clone(), config.queue_options()));

    let deps = Arc::new(ServerDeps::new(
        Some(pool.clone()),
        Arc::new(PostgresTaskStore::new(pool.clone())),
        job_queue.clone(),
        Arc::new(content),
        Arc::new(ai),
        config.summarize_timeout,
    ));

    // Job worker
    let mut registry = JobRegistry::new();
    register_task_jobs(&mut registry);
    tracing::info!(job_types = ?registry.registered_types(), "job handlers registered");
    let worker = JobWorker::new(
        job_queue,
        Arc::new(registry),
        deps.clone(),
        config.worker_config(),
    );
    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    // Start server
    let app = build_app(deps);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(address = %addr, "listening");
    tracing::info!("health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    // Stop claiming, let in-flight jobs finish
    tracing::info!("shutting down job worker");
    shutdown.cancel();
    match worker_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "job worker exited with error"),
        Err(e) => tracing::error!(error = %e, "job worker task panicked"),
    }

    pool.close().await;
    tracing::info!("shutdown complete");

    serve_result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        // Without a signal handler, never resolve; the process is stopped externally
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
