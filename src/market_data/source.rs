// =============================================================================
// Market Data Source — transport boundary consumed by the feed manager
// =============================================================================
//
// The feed manager never talks to an exchange directly. It asks a source for
// a bounded slice of history and for one multiplexed stream of ticker and
// candle messages. `BinanceSource` is the production implementation.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::market_data::Candle;

/// One decoded message from the streaming subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Lightweight ticker: latest price and 24h volume.
    Ticker { symbol: String, price: f64, volume: f64 },
    /// Kline update. `candle.finalized` tells whether the bar has closed.
    Candle { symbol: String, candle: Candle },
}

/// Stream of decoded messages. An `Err` item or the end of the stream both
/// mean the connection is gone.
pub type FeedStream = BoxStream<'static, Result<FeedMessage>>;

#[async_trait]
pub trait MarketDataSource: Send + Sync + 'static {
    /// Fetch up to `limit` historical candles for `symbol`, oldest first.
    async fn fetch_history(&self, symbol: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Open one streaming connection subscribed to the ticker and candle
    /// channels of every symbol in `symbols`.
    async fn connect(&self, symbols: &[String]) -> Result<FeedStream>;
}
