//! AlphaScroll arena service.
//!
//! Opens the prediction ledger, runs the evaluation sweep on its timer and
//! keeps the market-data cache tidy until Ctrl-C.
//!
//! Usage: `alphascroll [config.toml]`

use alphascroll::market::MarketData;
use alphascroll::{ArenaBuilder, ArenaConfig};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config =
        ArenaConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting AlphaScroll prediction arena");

    let market = MarketData::from_config(&config).context("Failed to build market clients")?;
    match market.coingecko().ping().await {
        Ok(_) => info!("CoinGecko API reachable"),
        Err(e) => warn!("CoinGecko API not reachable yet: {}", e),
    }

    let arena = ArenaBuilder::new()
        .with_config(config.clone())
        .build(market.coingecko())
        .await
        .context("Failed to open prediction arena")?;

    let stats = arena.get_leaderboard_stats().await?;
    info!(
        "Ledger holds {} users and {} predictions",
        stats.total_users, stats.total_predictions
    );

    match market.overview().await {
        Ok(overview) => info!(
            "Market cap ${:.0}, BTC dominance {:.1}%",
            overview.total_market_cap_usd.unwrap_or_default(),
            overview.btc_dominance().unwrap_or_default()
        ),
        Err(e) => warn!("Market overview unavailable: {}", e),
    }
    match market.fear_and_greed().await {
        Ok(index) => info!("Fear & greed index {} ({})", index.value, index.classification),
        Err(e) => warn!("Fear & greed index unavailable: {}", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = arena.spawn_scheduler(shutdown_rx.clone());

    let mut purge_shutdown = shutdown_rx;
    let purge_every = config.cache_ttl().max(Duration::from_secs(1));
    let purge_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            tokio::select! {
                _ = interval.tick() => market.purge_expired().await,
                _ = purge_shutdown.changed() => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, letting the current sweep finish");

    // Receivers stop on a send or once the sender is gone.
    let _ = shutdown_tx.send(true);
    scheduler_handle.await.context("Evaluation scheduler panicked")?;
    purge_handle.await.context("Cache purge task panicked")?;

    arena.close().await;
    info!("AlphaScroll stopped");
    Ok(())
}
