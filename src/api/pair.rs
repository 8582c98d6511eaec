// =============================================================================
// Pair loading — copy two symbols' closes out of the feed and validate them
// =============================================================================
//
// Shared by the REST and WebSocket handlers. The analytics pipeline itself
// accepts any length; the minimum-point rule is enforced here, before the
// pipeline is called.
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::market_data::{Candle, LiveFeedManager};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PairDataError {
    #[error("Unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("Insufficient data for {symbol}")]
    NoData { symbol: String },

    #[error("Not enough data points (minimum {needed}, got {got})")]
    InsufficientData { needed: usize, got: usize },
}

impl PairDataError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownSymbol { .. } | Self::NoData { .. } => StatusCode::NOT_FOUND,
            Self::InsufficientData { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for PairDataError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

/// Aligned close series for one pair. Timestamps are taken from symbol A.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSeries {
    pub prices_a: Vec<f64>,
    pub prices_b: Vec<f64>,
    pub timestamps: Vec<String>,
}

impl PairSeries {
    pub fn len(&self) -> usize {
        self.prices_a.len()
    }
}

/// Copy the last `lookback` candles of both symbols and align them.
pub fn load_pair(
    feed: &LiveFeedManager,
    symbol_a: &str,
    symbol_b: &str,
    lookback: usize,
    min_points: usize,
) -> Result<PairSeries, PairDataError> {
    for symbol in [symbol_a, symbol_b] {
        if !feed.is_tracked(symbol) {
            return Err(PairDataError::UnknownSymbol {
                symbol: symbol.to_string(),
            });
        }
    }

    let a = feed.recent_candles(symbol_a, lookback);
    if a.is_empty() {
        return Err(PairDataError::NoData {
            symbol: symbol_a.to_string(),
        });
    }
    let b = feed.recent_candles(symbol_b, lookback);
    if b.is_empty() {
        return Err(PairDataError::NoData {
            symbol: symbol_b.to_string(),
        });
    }
    align_pair(&a, &b, min_points)
}

/// Align two candle histories on their most recent common tail and reject
/// the pair when fewer than `min_points` remain.
pub fn align_pair(a: &[Candle], b: &[Candle], min_points: usize) -> Result<PairSeries, PairDataError> {
    let n = a.len().min(b.len());
    if n < min_points {
        return Err(PairDataError::InsufficientData {
            needed: min_points,
            got: n,
        });
    }

    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    Ok(PairSeries {
        prices_a: a.iter().map(|c| c.close).collect(),
        prices_b: b.iter().map(|c| c.close).collect(),
        timestamps: a.iter().map(Candle::iso_timestamp).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use crate::market_data::{FeedMessage, FeedSettings, FeedStream, MarketDataSource};

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

    fn candles(n: usize, base: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = base + i as f64;
                Candle::from_millis(i as i64 * 60_000, close, close, close, close, 1.0, true)
            })
            .collect()
    }

    #[test]
    fn ten_points_are_rejected_below_minimum() {
        let err = align_pair(&candles(10, 100.0), &candles(10, 50.0), 20).unwrap_err();
        assert_eq!(err, PairDataError::InsufficientData { needed: 20, got: 10 });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn aligns_on_most_recent_tail() {
        let pair = align_pair(&candles(30, 100.0), &candles(25, 50.0), 20).unwrap();
        assert_eq!(pair.len(), 25);
        assert_eq!(pair.prices_a.first(), Some(&105.0));
        assert_eq!(pair.prices_a.last(), Some(&129.0));
        assert_eq!(pair.prices_b.last(), Some(&74.0));
        assert_eq!(pair.timestamps[0], "1970-01-01T00:05:00");
    }

    #[test]
    fn load_pair_reports_missing_symbol() {
        let feed = LiveFeedManager::new(
            Arc::new(NullSource),
            ["btcusdt", "ethusdt"],
            FeedSettings::default(),
        );
        for candle in candles(30, 100.0) {
            feed.apply_message(FeedMessage::Candle {
                symbol: "btcusdt".into(),
                candle,
            });
        }

        let err = load_pair(&feed, "BTCUSDT", "ethusdt", 100, 20).unwrap_err();
        assert_eq!(err, PairDataError::NoData { symbol: "ethusdt".into() });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = load_pair(&feed, "dogeusdt", "btcusdt", 100, 20).unwrap_err();
        assert_eq!(err, PairDataError::UnknownSymbol { symbol: "dogeusdt".into() });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let pair = load_pair(&feed, "btcusdt", "btcusdt", 25, 20).unwrap();
        assert_eq!(pair.len(), 25);
    }
}
