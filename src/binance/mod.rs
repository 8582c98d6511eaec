pub mod client;
pub mod stream;

pub use client::BinanceClient;
pub use stream::BinanceSource;
