use clap::Parser;
use distributed_calculator::agent::client::HttpCoordinator;
use distributed_calculator::agent::pool::WorkerPool;
use distributed_calculator::config::{AgentConfig, load_env_file};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    env_file.report();

    let config = AgentConfig::parse();
    let pool_config = config.pool_config();

    tracing::info!(
        "Agent connecting to {} with {} workers",
        config.orchestrator_url,
        pool_config.pool_size
    );

    let coordinator = Arc::new(HttpCoordinator::new(
        config.orchestrator_url.clone(),
        config.request_timeout(),
    ));
    let pool = WorkerPool::new(coordinator, pool_config);
    let handles = pool.clone().start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down, waiting for in-flight tasks");
    pool.shutdown();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker ended abnormally: {}", e);
        }
    }

    Ok(())
}
