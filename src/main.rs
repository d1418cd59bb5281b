use anyhow::Context;
use tracing_subscriber::EnvFilter;

use conduit::config::Config;
use conduit::server::SimpleHttpServer;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load().context("Failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.executor.core_pool_size)
        .thread_keep_alive(cfg.executor.keep_alive())
        .thread_name("conduit-worker")
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(run(cfg))
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let mut server = SimpleHttpServer::from_config(cfg);
    server.init().context("Failed to initialize server")?;
    server.start()?;

    if let Ok(epr) = server.epr_for_service("Echo") {
        tracing::info!(epr = %epr, "Echo service available");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    server.destroy().await;
    Ok(())
}
