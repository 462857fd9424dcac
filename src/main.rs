use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use hoard::config::Config;
use hoard::proxy::{CacheCoordinator, CacheSettings, ProxyHandler};
use hoard::server::{ErrorLog, listener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let error_log = Arc::new(ErrorLog::create(&cfg.extras.error_log_path).await?);
    let coordinator = Arc::new(
        CacheCoordinator::open(&cfg.cache.dir, CacheSettings::new(&cfg.cache, &cfg.origin))
            .await
            .context("opening cache directory")?,
    );
    let handler = Arc::new(ProxyHandler::from_config(&cfg, coordinator.clone()).await?);

    tokio::select! {
        res = listener::run(&cfg.server.listen_addr, handler, error_log) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
