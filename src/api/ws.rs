// =============================================================================
// WebSocket Handlers — push-based price and analytics updates
// =============================================================================
//
//   /ws/live                          prices, candles and volumes every 1 s
//   /ws/analytics/:symbol_a/:symbol_b  pair analytics every 2 s
//
// Each connection runs one `tokio::select!` loop: a push interval on one arm,
// the client's inbound frames on the other. A text "ping" is answered with a
// text "pong". Payloads are built by pure functions so they can be tested
// without a socket.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analytics::{
    compute_hedge_ratio, compute_spread, compute_zscore, correlation, sanitize, sanitize_all,
    RegressionMethod,
};
use crate::api::pair::load_pair;
use crate::app_state::AppState;
use crate::market_data::LiveFeedManager;

const LIVE_PUSH_INTERVAL: Duration = Duration::from_secs(1);
const ANALYTICS_PUSH_INTERVAL: Duration = Duration::from_secs(2);
/// Candles per symbol in a live update.
const LIVE_CANDLES: usize = 100;
/// Trailing spread / z-score points in an analytics update.
const ANALYTICS_TAIL: usize = 20;

// =============================================================================
// Upgrade handlers
// =============================================================================

pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("live WebSocket connection accepted");
    ws.on_upgrade(move |socket| run_live(socket, state))
}

pub async fn analytics_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((symbol_a, symbol_b)): Path<(String, String)>,
) -> impl IntoResponse {
    info!(symbol_a = %symbol_a, symbol_b = %symbol_b, "analytics WebSocket connection accepted");
    ws.on_upgrade(move |socket| run_analytics(socket, state, symbol_a, symbol_b))
}

// =============================================================================
// Connection loops
// =============================================================================

async fn run_live(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    if send_json(&mut sender, &live_initial(&state.feed)).await.is_err() {
        warn!("failed to send initial live snapshot");
        return;
    }

    let mut ticker = interval(LIVE_PUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = send_json(&mut sender, &live_update(&state.feed)).await {
                    debug!(error = %e, "live WebSocket send failed, disconnecting");
                    break;
                }
            }
            msg = receiver.next() => {
                if !handle_inbound(&mut sender, msg).await {
                    break;
                }
            }
        }
    }

    info!("live WebSocket connection closed");
}

async fn run_analytics(socket: WebSocket, state: Arc<AppState>, symbol_a: String, symbol_b: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = interval(ANALYTICS_PUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(payload) = analytics_update(&state, &symbol_a, &symbol_b) else {
                    continue;
                };
                if let Err(e) = send_json(&mut sender, &payload).await {
                    debug!(error = %e, "analytics WebSocket send failed, disconnecting");
                    break;
                }
            }
            msg = receiver.next() => {
                if !handle_inbound(&mut sender, msg).await {
                    break;
                }
            }
        }
    }

    info!(symbol_a = %symbol_a, symbol_b = %symbol_b, "analytics WebSocket connection closed");
}

/// Process one inbound frame. Returns `false` when the connection is done.
async fn handle_inbound<S>(sender: &mut S, msg: Option<Result<Message, axum::Error>>) -> bool
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match msg {
        Some(Ok(Message::Text(text))) => {
            if text.trim() == "ping" {
                return sender.send(Message::Text("pong".to_string())).await.is_ok();
            }
            debug!(msg = %text, "ignoring WebSocket text message");
            true
        }
        Some(Ok(Message::Ping(data))) => sender.send(Message::Pong(data)).await.is_ok(),
        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => true,
        Some(Ok(Message::Close(_))) => {
            debug!("WebSocket Close frame received");
            false
        }
        Some(Err(e)) => {
            warn!(error = %e, "WebSocket receive error");
            false
        }
        None => false,
    }
}

async fn send_json<S>(sender: &mut S, payload: &Value) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    sender.send(Message::Text(payload.to_string())).await
}

// =============================================================================
// Payloads
// =============================================================================

fn live_initial(feed: &LiveFeedManager) -> Value {
    json!({
        "type": "initial",
        "prices": feed.all_prices(),
        "message": "Connected to live data stream",
    })
}

fn live_update(feed: &LiveFeedManager) -> Value {
    let ohlc: HashMap<&str, _> = feed
        .symbols()
        .iter()
        .map(|s| (s.as_str(), feed.recent_candles(s, LIVE_CANDLES)))
        .filter(|(_, candles)| !candles.is_empty())
        .collect();

    json!({
        "type": "update",
        "timestamp": Utc::now().to_rfc3339(),
        "prices": feed.all_prices(),
        "ohlc": ohlc,
        "volumes": feed.all_volumes(),
    })
}

/// OLS pair snapshot, or `None` while the pair has too little history.
fn analytics_update(state: &AppState, symbol_a: &str, symbol_b: &str) -> Option<Value> {
    let cfg = &state.config.analytics;
    let pair = match load_pair(&state.feed, symbol_a, symbol_b, cfg.lookback, cfg.min_points) {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, "analytics push skipped");
            return None;
        }
    };

    let beta = compute_hedge_ratio(
        &pair.prices_a,
        &pair.prices_b,
        RegressionMethod::Ols,
        &state.analytics.kalman,
    )
    .into_value()
    .beta;
    let spread = compute_spread(&pair.prices_a, &pair.prices_b, beta);
    let zscore = compute_zscore(&spread, state.analytics.zscore_window);
    let corr = correlation(&pair.prices_a, &pair.prices_b).into_value();

    Some(json!({
        "type": "analytics",
        "symbolA": symbol_a,
        "symbolB": symbol_b,
        "hedge_ratio": sanitize(beta),
        "spread": sanitize_all(tail(&spread, ANALYTICS_TAIL)),
        "zscore": sanitize_all(tail(&zscore, ANALYTICS_TAIL)),
        "correlation": sanitize(corr),
        "current_zscore": zscore.last().copied().map_or(0.0, sanitize),
    }))
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use crate::market_data::{Candle, FeedMessage, FeedStream, MarketDataSource};
    use crate::runtime_config::RuntimeConfig;

    struct NullSource;

    #[async_trait]
    impl MarketDataSource for NullSource {
        async fn fetch_history(&self, _symbol: &str, _limit: u32) -> Result<Vec<Candle>> {
            bail!("offline")
        }

        async fn connect(&self, _symbols: &[String]) -> Result<FeedStream> {
            bail!("offline")
        }
    }

    fn state(n: usize) -> AppState {
        let config = RuntimeConfig::default();
        let feed = Arc::new(LiveFeedManager::new(
            Arc::new(NullSource),
            config.symbols.clone(),
            config.feed_settings(),
        ));
        for i in 0..n {
            let t = i as i64 * 60_000;
            let a = 100.0 + i as f64 + (i as f64 * 0.7).sin();
            let b = 40.0 + 0.4 * i as f64;
            for (symbol, close) in [("btcusdt", a), ("ethusdt", b)] {
                feed.apply_message(FeedMessage::Candle {
                    symbol: symbol.into(),
                    candle: Candle::from_millis(t, close, close, close, close, 2.0, true),
                });
            }
        }
        feed.apply_message(FeedMessage::Ticker {
            symbol: "btcusdt".into(),
            price: 123.0,
            volume: 9.0,
        });
        AppState::new(config, feed)
    }

    #[test]
    fn initial_message_carries_prices() {
        let st = state(0);
        let msg = live_initial(&st.feed);
        assert_eq!(msg["type"], "initial");
        assert_eq!(msg["prices"]["btcusdt"], 123.0);
        assert_eq!(msg["message"], "Connected to live data stream");
    }

    #[test]
    fn live_update_omits_symbols_without_candles() {
        let st = state(150);
        let msg = live_update(&st.feed);
        assert_eq!(msg["type"], "update");
        assert_eq!(msg["ohlc"]["btcusdt"].as_array().unwrap().len(), LIVE_CANDLES);
        assert!(msg["ohlc"].get("solusdt").is_none());
        assert_eq!(msg["volumes"]["btcusdt"], 9.0);
    }

    #[test]
    fn analytics_waits_for_minimum_history() {
        let st = state(10);
        assert!(analytics_update(&st, "btcusdt", "ethusdt").is_none());
    }

    #[test]
    fn analytics_payload_is_trimmed_to_tail() {
        let st = state(60);
        let msg = analytics_update(&st, "btcusdt", "ethusdt").unwrap();
        assert_eq!(msg["type"], "analytics");
        assert_eq!(msg["symbolB"], "ethusdt");
        assert_eq!(msg["spread"].as_array().unwrap().len(), ANALYTICS_TAIL);
        let z = msg["zscore"].as_array().unwrap();
        assert_eq!(z.len(), ANALYTICS_TAIL);
        assert_eq!(msg["current_zscore"], z[ANALYTICS_TAIL - 1]);
        assert!(msg["correlation"].as_f64().unwrap() > 0.9);
    }

    #[test]
    fn tail_handles_short_input() {
        assert_eq!(tail(&[1.0, 2.0], 5), &[1.0, 2.0]);
        assert_eq!(tail(&[1.0, 2.0, 3.0], 2), &[2.0, 3.0]);
    }
}
