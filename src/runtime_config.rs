// =============================================================================
// Runtime Configuration — service settings loaded at startup
// =============================================================================
//
// Every tunable lives here: the tracked symbol set, Binance endpoints, feed
// backoff, HTTP bind address and analytics parameters. All fields carry
// `#[serde(default)]` so a partial (or empty) JSON file still loads.
//
// Two environment variables override the file:
//   PAIRS_SYMBOLS    comma-separated symbol list
//   PAIRS_BIND_ADDR  HTTP listen address
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analytics::{AnalyticsSettings, KalmanParams};
use crate::binance::client::DEFAULT_REST_URL;
use crate::binance::stream::DEFAULT_WS_URL;
use crate::market_data::candle_buffer::DEFAULT_CAPACITY;
use crate::market_data::FeedSettings;

pub const ENV_SYMBOLS: &str = "PAIRS_SYMBOLS";
pub const ENV_BIND_ADDR: &str = "PAIRS_BIND_ADDR";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "btcusdt".to_string(),
        "ethusdt".to_string(),
        "bnbusdt".to_string(),
        "solusdt".to_string(),
    ]
}

fn default_kline_interval() -> String {
    "1m".to_string()
}

fn default_backfill_limit() -> u32 {
    100
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_rest_base_url() -> String {
    DEFAULT_REST_URL.to_string()
}

fn default_ws_base_url() -> String {
    DEFAULT_WS_URL.to_string()
}

fn default_stream_retry_secs() -> u64 {
    2
}

fn default_connect_retry_secs() -> u64 {
    5
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    (5173..=5177)
        .map(|port| format!("http://localhost:{port}"))
        .collect()
}

fn default_lookback() -> usize {
    100
}

fn default_min_points() -> usize {
    20
}

fn default_zscore_window() -> usize {
    20
}

fn default_kalman_delta() -> f64 {
    1e-5
}

fn default_kalman_observation_noise() -> f64 {
    0.001
}

// =============================================================================
// AnalyticsConfig
// =============================================================================

/// Parameters for pair analytics requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Candles taken from each buffer per request.
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    /// Minimum aligned points before a pair is analysed.
    #[serde(default = "default_min_points")]
    pub min_points: usize,

    /// Trailing window for the rolling z-score.
    #[serde(default = "default_zscore_window")]
    pub zscore_window: usize,

    /// Kalman process noise scale δ.
    #[serde(default = "default_kalman_delta")]
    pub kalman_delta: f64,

    /// Kalman observation noise variance.
    #[serde(default = "default_kalman_observation_noise")]
    pub kalman_observation_noise: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            min_points: default_min_points(),
            zscore_window: default_zscore_window(),
            kalman_delta: default_kalman_delta(),
            kalman_observation_noise: default_kalman_observation_noise(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Market data ----------------------------------------------------

    /// Symbols tracked by the live feed (case-insensitive).
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Kline interval subscribed and backfilled.
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,

    /// Candles fetched per symbol at startup.
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: u32,

    /// Closed candles retained per symbol.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Delay before reconnecting after a dropped stream.
    #[serde(default = "default_stream_retry_secs")]
    pub stream_retry_secs: u64,

    /// Delay before retrying a failed connect.
    #[serde(default = "default_connect_retry_secs")]
    pub connect_retry_secs: u64,

    // --- HTTP -----------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// CORS origins; empty allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    // --- Analytics ------------------------------------------------------

    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            kline_interval: default_kline_interval(),
            backfill_limit: default_backfill_limit(),
            buffer_capacity: default_buffer_capacity(),
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            stream_retry_secs: default_stream_retry_secs(),
            connect_retry_secs: default_connect_retry_secs(),
            bind_addr: default_bind_addr(),
            allowed_origins: default_allowed_origins(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            bind_addr = %config.bind_addr,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_SYMBOLS) {
            let symbols: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                info!(symbols = ?symbols, "symbols overridden from {ENV_SYMBOLS}");
                self.symbols = symbols;
            }
        }

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            let addr = addr.trim();
            if !addr.is_empty() {
                info!(bind_addr = %addr, "bind address overridden from {ENV_BIND_ADDR}");
                self.bind_addr = addr.to_string();
            }
        }
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            buffer_capacity: self.buffer_capacity,
            backfill_limit: self.backfill_limit,
            stream_retry_delay: Duration::from_secs(self.stream_retry_secs),
            connect_retry_delay: Duration::from_secs(self.connect_retry_secs),
        }
    }

    pub fn analytics_settings(&self) -> AnalyticsSettings {
        AnalyticsSettings {
            zscore_window: self.analytics.zscore_window,
            kalman: KalmanParams {
                delta: self.analytics.kalman_delta,
                observation_noise: self.analytics.kalman_observation_noise,
            },
        }
    }
}
