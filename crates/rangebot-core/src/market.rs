//! Instrument precision constraints and candle data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Price, Size};

/// Lot and tick constraints for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentSpec {
    pub symbol: String,
    pub min_qty: Size,
    pub qty_step: Size,
    pub price_step: Price,
}

impl InstrumentSpec {
    pub fn new(symbol: impl Into<String>, min_qty: Size, qty_step: Size, price_step: Price) -> Self {
        Self {
            symbol: symbol.into(),
            min_qty,
            qty_step,
            price_step,
        }
    }

    /// Quantity floored to the lot step.
    pub fn quantize_qty(&self, qty: Size) -> Size {
        let q = qty.floor_to_step(self.qty_step);
        Size::new(q.inner().normalize())
    }

    /// Price rounded to the tick.
    pub fn quantize_price(&self, price: Price) -> Price {
        let p = price.round_to_tick(self.price_step);
        Price::new(p.inner().normalize())
    }

    /// Quantity for a target notional at `price`, floored to the lot step.
    pub fn qty_for_notional(&self, notional: Decimal, price: Price) -> Size {
        if !price.is_positive() {
            return Size::ZERO;
        }
        self.quantize_qty(Size::new(notional / price.inner()))
    }

    /// True when the quantity can actually be placed.
    pub fn accepts_qty(&self, qty: Size) -> bool {
        !qty.is_zero() && qty >= self.min_qty
    }
}

/// Latest candle observed for one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub observed_at: DateTime<Utc>,
}

impl Candle {
    /// High minus low; zero for inverted or empty candles.
    pub fn range(&self) -> Price {
        if self.high > self.low {
            self.high - self.low
        } else {
            Price::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> InstrumentSpec {
        InstrumentSpec::new(
            "BTCUSDT",
            Size::new(dec!(0.001)),
            Size::new(dec!(0.001)),
            Price::new(dec!(0.1)),
        )
    }

    #[test]
    fn test_qty_for_notional_floors() {
        let spec = btc();
        // 100 / 30000 = 0.00333.. -> 0.003
        let qty = spec.qty_for_notional(dec!(100), Price::new(dec!(30000)));
        assert_eq!(qty.inner(), dec!(0.003));
        assert!(spec.accepts_qty(qty));
    }

    #[test]
    fn test_qty_below_step_is_zero_and_rejected() {
        let spec = btc();
        let qty = spec.qty_for_notional(dec!(10), Price::new(dec!(30000)));
        assert!(qty.is_zero());
        assert!(!spec.accepts_qty(qty));
    }

    #[test]
    fn test_qty_for_notional_zero_price() {
        assert!(btc().qty_for_notional(dec!(100), Price::ZERO).is_zero());
    }

    #[test]
    fn test_quantize_price() {
        assert_eq!(
            btc().quantize_price(Price::new(dec!(29850.04))).inner(),
            dec!(29850.0)
        );
    }
}
