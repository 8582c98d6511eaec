// =============================================================================
// Candle Buffer — bounded, insertion-ordered history of closed candles
// =============================================================================
//
// One buffer per tracked symbol. Only finalized candles are stored; the
// in-progress bar the kline stream keeps re-sending is never retained, so every
// element is a closed interval. When the ring is full the oldest candle is
// evicted (FIFO).
//
// The buffer itself does no locking and no I/O. The feed manager wraps each
// buffer in its own lock and hands readers a copied snapshot.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Default number of closed candles retained per symbol.
pub const DEFAULT_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle. `timestamp` is the kline open time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    #[serde(serialize_with = "serialize_iso")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip)]
    pub finalized: bool,
}

impl Candle {
    /// Build a candle from a millisecond open time. Out-of-range timestamps
    /// collapse to the UNIX epoch.
    pub fn from_millis(
        open_time_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        finalized: bool,
    ) -> Self {
        Self {
            timestamp: DateTime::from_timestamp_millis(open_time_ms).unwrap_or_default(),
            open,
            high,
            low,
            close,
            volume,
            finalized,
        }
    }

    /// Open time in milliseconds since the UNIX epoch.
    pub fn open_time_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// ISO-8601 timestamp without offset, e.g. `2024-01-01T00:01:00`.
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

fn serialize_iso<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format("%Y-%m-%dT%H:%M:%S"))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("candle opened at {open_time_ms} is not finalized")]
    NotFinalized { open_time_ms: i64 },

    #[error("candle opened at {open_time_ms} is not after the newest stored candle ({newest_ms})")]
    OutOfOrder { open_time_ms: i64, newest_ms: i64 },
}

// ---------------------------------------------------------------------------
// CandleBuffer
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of closed candles, oldest first.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    ring: VecDeque<Candle>,
    capacity: usize,
}

impl CandleBuffer {
    /// Create an empty buffer holding at most `capacity` candles (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a closed candle, evicting the oldest one when full.
    ///
    /// Non-finalized candles, and candles not strictly newer than the newest
    /// stored one, are rejected and leave the buffer untouched.
    pub fn append(&mut self, candle: Candle) -> Result<(), BufferError> {
        let open_time_ms = candle.open_time_ms();
        if !candle.finalized {
            return Err(BufferError::NotFinalized { open_time_ms });
        }
        if let Some(newest_ms) = self.last_open_time() {
            if open_time_ms <= newest_ms {
                return Err(BufferError::OutOfOrder {
                    open_time_ms,
                    newest_ms,
                });
            }
        }

        self.ring.push_back(candle);
        while self.ring.len() > self.capacity {
            self.ring.pop_front();
        }
        Ok(())
    }

    /// Copy of the most recent `min(max_count, len)` candles, oldest first.
    pub fn snapshot(&self, max_count: usize) -> Vec<Candle> {
        let start = self.ring.len().saturating_sub(max_count);
        self.ring.range(start..).cloned().collect()
    }

    /// Open time of the newest stored candle, in milliseconds.
    pub fn last_open_time(&self) -> Option<i64> {
        self.ring.back().map(Candle::open_time_ms)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Close of the newest stored candle.
    #[cfg(test)]
    pub fn last_close(&self) -> Option<f64> {
        self.ring.back().map(|c| c.close)
    }
}

impl Default for CandleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_candle(i: i64, close: f64, finalized: bool) -> Candle {
        Candle::from_millis(
            1_700_000_000_000 + i * 60_000,
            close,
            close + 1.0,
            close - 1.0,
            close,
            10.0,
            finalized,
        )
    }

    #[test]
    fn ring_buffer_trimming() {
        let mut buf = CandleBuffer::new(3);
        for i in 0..5 {
            buf.append(sample_candle(i, 100.0 + i as f64, true)).unwrap();
        }

        assert_eq!(buf.len(), 3);
        let closes: Vec<f64> = buf.snapshot(10).iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn length_tracks_min_of_appended_and_capacity() {
        let mut buf = CandleBuffer::default();
        for i in 0..450 {
            buf.append(sample_candle(i, i as f64, true)).unwrap();
            assert_eq!(buf.len(), ((i + 1) as usize).min(DEFAULT_CAPACITY));
        }

        // The retained elements are exactly the latest 200 in arrival order.
        let snap = buf.snapshot(DEFAULT_CAPACITY);
        assert_eq!(snap.len(), DEFAULT_CAPACITY);
        for (offset, candle) in snap.iter().enumerate() {
            assert_eq!(candle.close, (250 + offset) as f64);
        }
    }

    #[test]
    fn non_finalized_candles_are_never_retained() {
        let mut buf = CandleBuffer::new(10);
        buf.append(sample_candle(0, 50.0, true)).unwrap();

        for i in 1..=25 {
            let err = buf.append(sample_candle(i, 60.0, false)).unwrap_err();
            assert!(matches!(err, BufferError::NotFinalized { .. }));
        }

        assert_eq!(buf.len(), 1);
        assert_eq!(buf.snapshot(1)[0].close, 50.0);
    }

    #[test]
    fn replayed_and_older_candles_are_rejected() {
        let mut buf = CandleBuffer::new(10);
        for i in 0..3 {
            buf.append(sample_candle(i, i as f64, true)).unwrap();
        }
        let newest_ms = buf.last_open_time().unwrap();

        for i in 0..3 {
            let err = buf.append(sample_candle(i, 99.0, true)).unwrap_err();
            assert!(matches!(err, BufferError::OutOfOrder { newest_ms: n, .. } if n == newest_ms));
        }
        assert_eq!(buf.len(), 3);

        buf.append(sample_candle(3, 3.0, true)).unwrap();
        let times: Vec<i64> = buf.snapshot(10).iter().map(Candle::open_time_ms).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(buf.last_open_time(), Some(times[3]));
    }

    #[test]
    fn snapshot_returns_most_recent_in_chronological_order() {
        let mut buf = CandleBuffer::new(10);
        for i in 0..6 {
            buf.append(sample_candle(i, i as f64, true)).unwrap();
        }

        let snap = buf.snapshot(2);
        assert_eq!(snap.len(), 2);
        assert!(snap[0].timestamp < snap[1].timestamp);
        assert_eq!(snap[1].close, 5.0);

        assert!(buf.snapshot(0).is_empty());
        assert_eq!(buf.snapshot(100).len(), 6);
    }

    #[test]
    fn snapshot_is_detached_from_buffer() {
        let mut buf = CandleBuffer::new(2);
        buf.append(sample_candle(0, 1.0, true)).unwrap();
        let before = buf.snapshot(2);

        buf.append(sample_candle(1, 2.0, true)).unwrap();
        buf.append(sample_candle(2, 3.0, true)).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].close, 1.0);
    }

    #[test]
    fn last_close_empty_returns_none() {
        let buf = CandleBuffer::new(10);
        assert!(buf.is_empty());
        assert_eq!(buf.last_close(), None);
    }

    #[test]
    fn serialises_timestamp_as_iso() {
        let candle = Candle::from_millis(1_700_000_040_000, 1.0, 2.0, 0.5, 1.5, 3.0, true);
        let json = serde_json::to_value(&candle).unwrap();
        assert_eq!(json["timestamp"], "2023-11-14T22:14:00");
        assert_eq!(json["close"], 1.5);
        assert!(json.get("finalized").is_none());
        assert_eq!(candle.iso_timestamp(), "2023-11-14T22:14:00");
    }
}
