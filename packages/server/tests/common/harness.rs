//! Test harnesses for integration testing.
//!
//! [`WorkerHarness`] runs the real job worker against the in-memory queue and
//! task store. [`TestHarness`] starts a shared Postgres container (testcontainers)
//! for the SQL-backed store and queue; it needs Docker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use server_core::domains::tasks::register_task_jobs;
use server_core::kernel::jobs::{JobRegistry, JobWorker, JobWorkerConfig};
use server_core::kernel::{ServerDeps, TestDependencies};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

// =============================================================================
// In-memory worker harness
// =============================================================================

/// Worker plus in-memory dependencies; the `deps` handles stay available for
/// assertions.
pub struct WorkerHarness {
    pub deps: TestDependencies,
    pub server_deps: Arc<ServerDeps>,
}

impl WorkerHarness {
    pub fn new(deps: TestDependencies) -> Self {
        let server_deps = deps.server_deps();
        Self { deps, server_deps }
    }

    /// Run the worker until every job has succeeded or been dead-lettered,
    /// then shut it down. Meant for paused-time tests.
    pub async fn run_until_idle(&self) {
        let mut registry = JobRegistry::new();
        register_task_jobs(&mut registry);

        let config = JobWorkerConfig {
            poll_interval: Duration::from_millis(100),
            ..JobWorkerConfig::with_worker_id("test-worker")
        };
        let worker = JobWorker::new(
            self.deps.job_queue.clone(),
            Arc::new(registry),
            self.server_deps.clone(),
            config,
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        // Generous bound: queue backoff tops out at tens of seconds
        let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
        while !self.deps.job_queue.is_idle() {
            assert!(tokio::time::Instant::now() < deadline, "worker never went idle");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        shutdown.cancel();
        handle
            .await
            .expect("worker task panicked")
            .expect("worker returned an error");
    }
}

// =============================================================================
// Postgres harness
// =============================================================================

/// Shared test infrastructure that persists across all tests.
/// The container is started once and reused, migrations run once.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Fresh pool on the shared, migrated database.
pub struct TestHarness {
    pub db_pool: PgPool,
}

impl test_context::AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        Ok(Self { db_pool })
    }
}
