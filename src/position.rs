// 4.0: per-account position. pnl = size * (price - last_price).
// margin is always net of everything already realized: each mutation folds pnl, funding and fees
// into margin and moves last_price / last_funding_index forward.

use crate::math::multiply_decimal;
use crate::types::{PositionId, Price, Quote, SignedSize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub size: SignedSize,
    pub margin: Quote,
    pub last_price: Option<Price>,
    pub last_funding_index: usize,
}

impl Position {
    /// A fresh, empty position. created on the account's first margin transfer or order.
    pub fn new(id: PositionId, funding_index: usize) -> Self {
        Self {
            id,
            size: SignedSize::zero(),
            margin: Quote::zero(),
            last_price: None,
            last_funding_index: funding_index,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }

    // 4.1: paper gains/losses since the last mutation
    pub fn profit_loss(&self, price: Price) -> Quote {
        match self.last_price {
            Some(last) => calculate_profit_loss(self.size, last, price),
            None => Quote::zero(),
        }
    }

    pub fn notional_value(&self, price: Price) -> Quote {
        Quote::new(multiply_decimal(self.size.abs(), price.value()))
    }

    /// Zero the position in place, keeping its id.
    pub fn zeroed(&self, funding_index: usize) -> Self {
        Self {
            id: self.id,
            size: SignedSize::zero(),
            margin: Quote::zero(),
            last_price: None,
            last_funding_index: funding_index,
        }
    }
}

// 4.2: the pnl formula. size * (price - last)
pub fn calculate_profit_loss(size: SignedSize, last_price: Price, price: Price) -> Quote {
    Quote::new(multiply_decimal(size.value(), price.value() - last_price.value()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position {
            id: PositionId(1),
            size: SignedSize::new(dec!(50)),
            margin: Quote::new(dec!(1000)),
            last_price: Some(Price::new_unchecked(dec!(200))),
            last_funding_index: 0,
        }
    }

    #[test]
    fn profit_loss_long() {
        let pos = long_position();
        assert_eq!(pos.profit_loss(Price::new_unchecked(dec!(210))).value(), dec!(500));
        assert_eq!(pos.profit_loss(Price::new_unchecked(dec!(180))).value(), dec!(-1000));
    }

    #[test]
    fn profit_loss_short() {
        let mut pos = long_position();
        pos.size = SignedSize::new(dec!(-50));
        assert_eq!(pos.profit_loss(Price::new_unchecked(dec!(180))).value(), dec!(1000));
    }

    #[test]
    fn empty_position_has_no_pnl() {
        let pos = Position::new(PositionId(3), 0);
        assert!(!pos.is_open());
        assert_eq!(pos.profit_loss(Price::new_unchecked(dec!(999))), Quote::zero());
        assert_eq!(pos.notional_value(Price::new_unchecked(dec!(999))).value(), Decimal::ZERO);
    }

    #[test]
    fn zeroing_keeps_id() {
        let pos = long_position();
        let zeroed = pos.zeroed(7);
        assert_eq!(zeroed.id, pos.id);
        assert!(!zeroed.is_open());
        assert_eq!(zeroed.margin, Quote::zero());
        assert_eq!(zeroed.last_funding_index, 7);
    }

    #[test]
    fn notional_is_unsigned() {
        let mut pos = long_position();
        pos.size = SignedSize::new(dec!(-2));
        assert_eq!(pos.notional_value(Price::new_unchecked(dec!(150))).value(), dec!(300));
    }
}
