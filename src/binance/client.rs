// =============================================================================
// Binance REST API Client — public market data
// =============================================================================
//
// Only unsigned public endpoints are used: historical klines for the backfill.
// Kline rows arrive as arrays with string-encoded numbers:
//
//   [openTime, "open", "high", "low", "close", "volume", closeTime, ...]
//
// The last row of a klines response is usually the bar still forming; it is
// marked non-finalized by comparing its close time with the wall clock.
// =============================================================================

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::market_data::Candle;

/// Default REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://api.binance.com";

/// Binance REST API client for public market data.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    /// Create a client against `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/v3/klines: up to `limit` candles, oldest first.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            interval,
            limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!(
                "Binance GET /api/v3/klines returned {}: {}",
                status,
                body
            );
        }

        let candles = parse_klines(&body, Utc::now().timestamp_millis())?;
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

/// Decode a klines response body. Rows whose close time is not yet in the
/// past (relative to `now_ms`) are returned with `finalized = false`.
pub fn parse_klines(body: &serde_json::Value, now_ms: i64) -> Result<Vec<Candle>> {
    let raw = body
        .as_array()
        .context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());

    for entry in raw {
        let arr = entry
            .as_array()
            .context("kline entry is not an array")?;

        if arr.len() < 6 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0]
            .as_i64()
            .context("kline open time is not an integer")?;
        let open = parse_str_f64(&arr[1])?;
        let high = parse_str_f64(&arr[2])?;
        let low = parse_str_f64(&arr[3])?;
        let close = parse_str_f64(&arr[4])?;
        let volume = parse_str_f64(&arr[5])?;
        let finalized = arr
            .get(6)
            .and_then(|v| v.as_i64())
            .map_or(true, |close_time| close_time < now_ms);

        candles.push(Candle::from_millis(open_time, open, high, low, close, volume, finalized));
    }

    Ok(candles)
}

/// Parse a JSON value that is either a numeric string or a number.
pub(crate) fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_closed_and_forming_rows() {
        let body = json!([
            [1_700_000_000_000i64, "100.0", "101.5", "99.5", "101.0", "12.5", 1_700_000_059_999i64, "0", 10, "0", "0", "0"],
            [1_700_000_060_000i64, "101.0", "102.0", "100.5", "101.8", "3.0", 1_700_000_119_999i64, "0", 4, "0", "0", "0"]
        ]);

        let candles = parse_klines(&body, 1_700_000_090_000).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time_ms(), 1_700_000_000_000);
        assert_eq!(candles[0].high, 101.5);
        assert_eq!(candles[0].volume, 12.5);
        assert!(candles[0].finalized);
        assert!(!candles[1].finalized);
        assert_eq!(candles[1].close, 101.8);
    }

    #[test]
    fn skips_short_rows_and_rejects_bad_numbers() {
        let body = json!([[1, "1.0", "1.0"]]);
        assert!(parse_klines(&body, 0).unwrap().is_empty());

        let body = json!([[1, "abc", "1", "1", "1", "1"]]);
        assert!(parse_klines(&body, 0).is_err());

        assert!(parse_klines(&json!({"code": -1121}), 0).is_err());
    }

    #[test]
    fn parse_str_f64_accepts_strings_and_numbers() {
        assert_eq!(parse_str_f64(&json!("42.5")).unwrap(), 42.5);
        assert_eq!(parse_str_f64(&json!(7.25)).unwrap(), 7.25);
        assert!(parse_str_f64(&json!(null)).is_err());
    }

    #[test]
    fn new_trims_trailing_slash() {
        let client = BinanceClient::new("https://api.binance.com/").unwrap();
        assert_eq!(client.base_url(), DEFAULT_REST_URL);
    }
}
