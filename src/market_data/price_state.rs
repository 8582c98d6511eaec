// =============================================================================
// Price State — latest trade price and 24h volume per symbol
// =============================================================================

use serde::Serialize;

/// Latest ticker view of one symbol. Updated by every ticker message and by
/// the backfill (price only), independently of candle finalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PriceState {
    pub price: Option<f64>,
    pub volume: Option<f64>,
}

impl PriceState {
    /// Apply a ticker update.
    pub fn apply_ticker(&mut self, price: f64, volume: f64) {
        self.price = Some(price);
        self.volume = Some(volume);
    }

    /// Seed the price from a historical close. Volume is left untouched since
    /// a candle volume is not a 24h volume.
    pub fn seed_price(&mut self, close: f64) {
        self.price = Some(close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_sets_both_fields() {
        let mut state = PriceState::default();
        state.apply_ticker(42_000.5, 1234.0);
        assert_eq!(state.price, Some(42_000.5));
        assert_eq!(state.volume, Some(1234.0));
    }

    #[test]
    fn seed_keeps_volume_absent() {
        let mut state = PriceState::default();
        state.seed_price(10.0);
        assert_eq!(state.price, Some(10.0));
        assert_eq!(state.volume, None);
    }
}
