use clap::Parser;
use distributed_calculator::agent::client::LocalCoordinator;
use distributed_calculator::agent::pool::WorkerPool;
use distributed_calculator::config::{OrchestratorConfig, load_env_file};
use distributed_calculator::scheduler::handlers::router;
use distributed_calculator::scheduler::service::Scheduler;
use distributed_calculator::scheduler::sqlite::SqliteRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    env_file.report();

    let config = OrchestratorConfig::parse();
    let http_addr = config.bind_addr()?;

    // 1. Storage:
    let store_config = config.store_config();
    tracing::info!("Opening task store at {:?}", store_config.path);
    let repository = SqliteRepository::open(store_config).await?;

    // 2. Scheduler:
    let scheduler = Scheduler::new(Arc::new(repository));

    // 3. Embedded workers:
    if let Some(pool_config) = config.local_pool_config() {
        tracing::info!("Running {} local workers", pool_config.pool_size);
        let coordinator = Arc::new(LocalCoordinator::new(scheduler.clone()));
        WorkerPool::new(coordinator, pool_config).start();
    }

    // 4. Spawn stats reporter:
    let stats_scheduler = scheduler.clone();
    let stats_interval = Duration::from_secs(config.stats_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(stats_interval);

        loop {
            interval.tick().await;
            match stats_scheduler.task_status_counts().await {
                Ok(counts) => tracing::info!(
                    "Task stats: {} waiting, {} in process, {} done, {} failed",
                    counts.wait,
                    counts.in_process,
                    counts.done,
                    counts.failed
                ),
                Err(e) => tracing::error!("Failed to read task stats: {}", e),
            }
        }
    });

    // 5. Start HTTP server:
    let app = router(scheduler);

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
