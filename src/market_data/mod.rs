pub mod candle_buffer;
pub mod feed;
pub mod price_state;
pub mod source;

// Re-exports for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle_buffer::{Candle, CandleBuffer};
pub use feed::{FeedSettings, LiveFeedManager};
pub use price_state::PriceState;
pub use source::{FeedMessage, FeedStream, MarketDataSource};
