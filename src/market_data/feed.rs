// =============================================================================
// Live Feed Manager — backfill, stream, reconnect
// =============================================================================
//
// Owns one CandleBuffer and one PriceState per tracked symbol plus the single
// streaming task. Lifecycle:
//
//   Stopped -> Backfilling -> Streaming <-> Reconnecting -> Stopped
//
// The streaming task is the only writer. Readers (REST handlers, analytics
// requests, WebSocket pushes) take copies under a short read lock and never
// wait on the network.
//
// Reconnect policy: fixed delay, no growth, no cap. A stream that fails or
// ends waits `stream_retry_delay` (2s); a connect that fails waits
// `connect_retry_delay` (5s). The loop only exits once `stop()` clears the
// running flag.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::market_data::candle_buffer::DEFAULT_CAPACITY;
use crate::market_data::{Candle, CandleBuffer, FeedMessage, FeedStream, MarketDataSource, PriceState};
use crate::types::FeedState;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for the feed manager.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Closed candles retained per symbol.
    pub buffer_capacity: usize,
    /// Candles requested per symbol during backfill.
    pub backfill_limit: u32,
    /// Delay after an established stream fails or ends.
    pub stream_retry_delay: Duration,
    /// Delay after a failed connect attempt.
    pub connect_retry_delay: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            backfill_limit: 100,
            stream_retry_delay: Duration::from_secs(2),
            connect_retry_delay: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// LiveFeedManager
// ---------------------------------------------------------------------------

pub struct LiveFeedManager {
    source: Arc<dyn MarketDataSource>,
    symbols: Vec<String>,
    /// Fixed at construction; only the inner buffers are mutated.
    buffers: HashMap<String, RwLock<CandleBuffer>>,
    prices: RwLock<HashMap<String, PriceState>>,
    state: RwLock<FeedState>,
    running: AtomicBool,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    settings: FeedSettings,
}

impl LiveFeedManager {
    /// Build a manager tracking `symbols` (case-normalized, duplicates
    /// dropped). Buffers start empty and the feed starts `Stopped`.
    pub fn new<I, S>(source: Arc<dyn MarketDataSource>, symbols: I, settings: FeedSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tracked: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = normalize(symbol.as_ref());
            if !symbol.is_empty() && !tracked.contains(&symbol) {
                tracked.push(symbol);
            }
        }

        let buffers = tracked
            .iter()
            .map(|s| (s.clone(), RwLock::new(CandleBuffer::new(settings.buffer_capacity))))
            .collect();
        let prices = tracked
            .iter()
            .map(|s| (s.clone(), PriceState::default()))
            .collect();

        Self {
            source,
            symbols: tracked,
            buffers,
            prices: RwLock::new(prices),
            state: RwLock::new(FeedState::Stopped),
            running: AtomicBool::new(false),
            stream_task: Mutex::new(None),
            settings,
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Backfill every symbol, then spawn the streaming task.
    ///
    /// Per-symbol fetch failures are logged and skipped. Calling `start` on
    /// a running feed is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("live feed already running");
            return;
        }

        info!(symbols = ?self.symbols, "starting live feed");
        self.set_state(FeedState::Backfilling);
        self.backfill().await;

        if !self.is_running() {
            info!("live feed stopped during backfill");
            return;
        }

        let feed = Arc::clone(self);
        let handle = tokio::spawn(async move { feed.stream_loop().await });
        *self.stream_task.lock() = Some(handle);

        // stop() may have run between the check above and storing the handle.
        if !self.is_running() {
            if let Some(handle) = self.stream_task.lock().take() {
                handle.abort();
            }
        }
    }

    /// Stop streaming and drop the connection. Safe to call repeatedly and
    /// on a feed that was never started.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        let handle = self.stream_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancellation is the expected outcome.
            let _ = handle.await;
        }

        self.set_state(FeedState::Stopped);
        if was_running {
            info!("live feed stopped");
        }
    }

    async fn backfill(&self) {
        let limit = self.settings.backfill_limit;
        info!(limit, "fetching historical candles");

        for symbol in &self.symbols {
            match self.source.fetch_history(symbol, limit).await {
                Ok(candles) => {
                    let loaded = self.apply_history(symbol, candles);
                    info!(symbol = %symbol, loaded, "historical candles loaded");
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "backfill failed; stream will populate buffer");
                }
            }
        }

        info!(counts = ?self.data_counts(), "backfill complete");
    }

    /// Append fetched history (oldest first) and seed the price from the
    /// newest candle. Candles already held (after a restart) are skipped.
    /// Returns the number of candles stored.
    fn apply_history(&self, symbol: &str, candles: Vec<Candle>) -> usize {
        let Some(buffer) = self.buffers.get(symbol) else {
            return 0;
        };

        let latest_close = candles.last().map(|c| c.close);
        let mut loaded = 0;
        {
            let mut buf = buffer.write();
            for candle in candles {
                match buf.append(candle) {
                    Ok(()) => loaded += 1,
                    Err(e) => debug!(symbol = %symbol, error = %e, "skipping historical candle"),
                }
            }
        }

        if let Some(close) = latest_close {
            if let Some(state) = self.prices.write().get_mut(symbol) {
                state.seed_price(close);
            }
        }
        loaded
    }

    async fn stream_loop(self: Arc<Self>) {
        while self.is_running() {
            match self.source.connect(&self.symbols).await {
                Ok(stream) => {
                    self.set_state(FeedState::Streaming);
                    info!(symbols = self.symbols.len(), "market data stream connected");

                    match self.consume(stream).await {
                        Ok(()) => warn!("market data stream ended"),
                        Err(e) => error!(error = %e, "market data stream failed"),
                    }

                    if !self.is_running() {
                        break;
                    }
                    self.set_state(FeedState::Reconnecting);
                    info!(
                        delay_ms = self.settings.stream_retry_delay.as_millis() as u64,
                        "reconnecting market data stream"
                    );
                    tokio::time::sleep(self.settings.stream_retry_delay).await;
                }
                Err(e) => {
                    if !self.is_running() {
                        break;
                    }
                    self.set_state(FeedState::Reconnecting);
                    error!(
                        error = %e,
                        delay_ms = self.settings.connect_retry_delay.as_millis() as u64,
                        "market data connect failed"
                    );
                    tokio::time::sleep(self.settings.connect_retry_delay).await;
                }
            }
        }
        debug!("stream loop exited");
    }

    async fn consume(&self, mut stream: FeedStream) -> Result<()> {
        while let Some(item) = stream.next().await {
            self.apply_message(item?);
        }
        Ok(())
    }

    /// Apply one streamed message. Returns `true` when buffer or price state
    /// changed; untracked symbols and still-forming candles are dropped.
    pub fn apply_message(&self, message: FeedMessage) -> bool {
        match message {
            FeedMessage::Ticker { symbol, price, volume } => {
                let mut prices = self.prices.write();
                match prices.get_mut(&normalize(&symbol)) {
                    Some(state) => {
                        state.apply_ticker(price, volume);
                        true
                    }
                    None => false,
                }
            }
            FeedMessage::Candle { symbol, candle } => {
                let symbol = normalize(&symbol);
                let Some(buffer) = self.buffers.get(&symbol) else {
                    return false;
                };
                if !candle.finalized {
                    return false;
                }
                let close = candle.close;
                match buffer.write().append(candle) {
                    Ok(()) => {
                        debug!(symbol = %symbol, close, "candle closed");
                        true
                    }
                    Err(_) => false,
                }
            }
        }
    }

    fn set_state(&self, next: FeedState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = %*state, to = %next, "feed state transition");
            *state = next;
        }
    }

    // ── Read accessors (never block on the network) ─────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    /// Tracked symbols in construction order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.buffers.contains_key(&normalize(symbol))
    }

    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.prices.read().get(&normalize(symbol)).and_then(|s| s.price)
    }

    pub fn latest_volume(&self, symbol: &str) -> Option<f64> {
        self.prices.read().get(&normalize(symbol)).and_then(|s| s.volume)
    }

    /// Copy of the most recent `count` closed candles, oldest first. Unknown
    /// symbols yield an empty vector.
    pub fn recent_candles(&self, symbol: &str, count: usize) -> Vec<Candle> {
        self.buffers
            .get(&normalize(symbol))
            .map(|buf| buf.read().snapshot(count))
            .unwrap_or_default()
    }

    /// Every symbol with a known price.
    pub fn all_prices(&self) -> HashMap<String, f64> {
        self.prices
            .read()
            .iter()
            .filter_map(|(symbol, state)| state.price.map(|p| (symbol.clone(), p)))
            .collect()
    }

    /// Every symbol with a known 24h volume.
    pub fn all_volumes(&self) -> HashMap<String, f64> {
        self.prices
            .read()
            .iter()
            .filter_map(|(symbol, state)| state.volume.map(|v| (symbol.clone(), v)))
            .collect()
    }

    /// Number of stored candles per tracked symbol.
    pub fn data_counts(&self) -> HashMap<String, usize> {
        self.buffers
            .iter()
            .map(|(symbol, buf)| (symbol.clone(), buf.read().len()))
            .collect()
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
