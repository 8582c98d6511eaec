// =============================================================================
// Pairs Analytics — Main Entry Point
// =============================================================================
//
// Starts the Binance live feed in the background and serves the analytics
// REST/WebSocket API. The API is available immediately; pair endpoints answer
// with "insufficient data" until the backfill has landed.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analytics;
mod api;
mod app_state;
mod binance;
mod market_data;
mod runtime_config;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::{BinanceClient, BinanceSource};
use crate::market_data::LiveFeedManager;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Pairs Analytics — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    info!(
        symbols = ?config.symbols,
        interval = %config.kline_interval,
        lookback = config.analytics.lookback,
        "Configured symbols"
    );

    // ── 2. Market data feed ──────────────────────────────────────────────
    let client = BinanceClient::new(config.rest_base_url.clone())?;
    info!(rest = %client.base_url(), ws = %config.ws_base_url, "Binance endpoints");
    let source = BinanceSource::new(
        client,
        config.ws_base_url.clone(),
        config.kline_interval.clone(),
    );
    let feed = Arc::new(LiveFeedManager::new(
        Arc::new(source),
        config.symbols.clone(),
        config.feed_settings(),
    ));

    let starter = feed.clone();
    tokio::spawn(async move {
        starter.start().await;
    });

    // ── 3. API server ────────────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, feed.clone()));
    let app = api::rest::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    feed.stop().await;
    info!("Pairs Analytics shut down complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    warn!("Shutdown signal received — stopping gracefully");
}
