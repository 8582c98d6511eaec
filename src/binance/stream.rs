// =============================================================================
// Binance combined stream — miniTicker + kline over one WebSocket
// =============================================================================
//
// URL shape:
//   {ws_base}/stream?streams=btcusdt@miniTicker/btcusdt@kline_1m/ethusdt@...
//
// Combined-stream frames wrap the payload as `{"stream": "...", "data": {...}}`.
// Raw single-stream frames carry the payload directly; both are accepted.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::binance::client::{parse_str_f64, BinanceClient};
use crate::market_data::{Candle, FeedMessage, FeedStream, MarketDataSource};

/// Default combined-stream endpoint.
pub const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443";

/// Build the combined-stream URL subscribing each symbol to its ticker and
/// kline channels.
pub fn build_stream_url(ws_base: &str, symbols: &[String], interval: &str) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| s.to_lowercase())
        .flat_map(|s| [format!("{s}@miniTicker"), format!("{s}@kline_{interval}")])
        .collect();
    format!(
        "{}/stream?streams={}",
        ws_base.trim_end_matches('/'),
        streams.join("/")
    )
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for frames that are neither tickers nor klines
/// (subscription acks, other event types).
///
/// Ticker shape:
/// ```json
/// { "e": "24hrMiniTicker", "s": "BTCUSDT", "c": "37000.00", "v": "1234.5" }
/// ```
/// Kline shape:
/// ```json
/// { "e": "kline", "s": "BTCUSDT",
///   "k": { "t": 1700000000000, "s": "BTCUSDT", "o": "1", "h": "2", "l": "0.5",
///          "c": "1.5", "v": "10", "x": false } }
/// ```
pub fn parse_stream_message(text: &str) -> Result<Option<FeedMessage>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse stream JSON")?;
    let data = root.get("data").unwrap_or(&root);

    match data["e"].as_str() {
        Some("24hrMiniTicker") => {
            let symbol = data["s"]
                .as_str()
                .context("missing field s")?
                .to_lowercase();
            let price = parse_str_f64(&data["c"]).context("bad ticker price")?;
            let volume = parse_str_f64(&data["v"]).context("bad ticker volume")?;
            Ok(Some(FeedMessage::Ticker { symbol, price, volume }))
        }
        Some("kline") => {
            let k = &data["k"];
            let symbol = k["s"]
                .as_str()
                .or_else(|| data["s"].as_str())
                .context("missing kline symbol")?
                .to_lowercase();
            let open_time = k["t"].as_i64().context("missing kline open time")?;
            let candle = Candle::from_millis(
                open_time,
                parse_str_f64(&k["o"])?,
                parse_str_f64(&k["h"])?,
                parse_str_f64(&k["l"])?,
                parse_str_f64(&k["c"])?,
                parse_str_f64(&k["v"])?,
                k["x"].as_bool().unwrap_or(false),
            );
            Ok(Some(FeedMessage::Candle { symbol, candle }))
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// BinanceSource
// ---------------------------------------------------------------------------

/// Production market data source: REST klines for history, the combined
/// WebSocket stream for live updates.
pub struct BinanceSource {
    client: BinanceClient,
    ws_base_url: String,
    interval: String,
}

impl BinanceSource {
    pub fn new(client: BinanceClient, ws_base_url: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            client,
            ws_base_url: ws_base_url.into(),
            interval: interval.into(),
        }
    }
}

#[async_trait]
impl MarketDataSource for BinanceSource {
    async fn fetch_history(&self, symbol: &str, limit: u32) -> Result<Vec<Candle>> {
        self.client.get_klines(symbol, &self.interval, limit).await
    }

    async fn connect(&self, symbols: &[String]) -> Result<FeedStream> {
        let url = build_stream_url(&self.ws_base_url, symbols, &self.interval);
        info!(url = %url, "connecting to market data WebSocket");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to market data WebSocket")?;

        // The socket stays unsplit so tungstenite can answer server pings
        // while we read.
        let feed = stream::unfold(ws_stream, |mut ws| async move {
            loop {
                match ws.next().await? {
                    Ok(Message::Text(text)) => match parse_stream_message(&text) {
                        Ok(Some(msg)) => return Some((Ok(msg), ws)),
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(error = %e, "failed to parse stream message");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        info!(frame = ?frame, "market data WebSocket closed by server");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "market data WebSocket read error");
                        let err = anyhow::Error::new(e).context("market data WebSocket read error");
                        return Some((Err(err), ws));
                    }
                }
            }
        })
        .boxed();

        Ok(feed)
    }
}
