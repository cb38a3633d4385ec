//! Margin and PnL calculation.
//!
//! Everything here is a pure function of a position, a price, the funding
//! sequence and the market parameters. Nothing mutates state.
//!
//! Remaining margin is margin plus unrealized pnl plus accrued funding,
//! floored at zero. A position is liquidatable once remaining margin falls to
//! the liquidation margin: the keeper's liquidation fee plus a buffer
//! proportional to notional.

use crate::config::MarketParams;
use crate::funding::{self, FundingSequence};
use crate::math::{clamp, divide_decimal, multiply_decimal};
use crate::position::Position;
use crate::types::{Price, Quote, SignedSize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub fn notional_value(size: SignedSize, price: Price) -> Quote {
    Quote::new(multiply_decimal(size.abs(), price.value()))
}

/// Keeper reward for liquidating `size` at `price`: proportional to notional,
/// floored at the minimum keeper fee and capped at the maximum.
pub fn liquidation_fee(size: SignedSize, price: Price, params: &MarketParams) -> Quote {
    let proportional = multiply_decimal(notional_value(size, price).value(), params.liquidation_fee_ratio);
    Quote::new(clamp(
        proportional,
        params.min_keeper_fee.value(),
        params.max_keeper_fee.value(),
    ))
}

/// Margin floor below which the position can be liquidated.
pub fn liquidation_margin(size: SignedSize, price: Price, params: &MarketParams) -> Quote {
    let buffer = multiply_decimal(notional_value(size, price).value(), params.liquidation_buffer_ratio);
    liquidation_fee(size, price, params).add(Quote::new(buffer))
}

/// Fee for changing the position by `size_delta` at `price` given the market `skew`.
///
/// The part of the trade that pulls the skew towards zero pays the maker rate,
/// whatever grows the skew (including the overshoot past zero) pays the taker rate.
pub fn order_fee(
    size_delta: Decimal,
    price: Price,
    skew: SignedSize,
    maker_rate: Decimal,
    taker_rate: Decimal,
) -> Quote {
    let skew = skew.value();
    let opposes_skew = (size_delta > Decimal::ZERO && skew < Decimal::ZERO)
        || (size_delta < Decimal::ZERO && skew > Decimal::ZERO);

    let reducing = if opposes_skew {
        size_delta.abs().min(skew.abs())
    } else {
        Decimal::ZERO
    };
    let increasing = size_delta.abs() - reducing;

    let maker_part = multiply_decimal(multiply_decimal(reducing, price.value()), maker_rate);
    let taker_part = multiply_decimal(multiply_decimal(increasing, price.value()), taker_rate);
    Quote::new(maker_part + taker_part)
}

/// Everything a caller might want to display about one position at one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginSnapshot {
    pub notional_value: Quote,
    pub profit_loss: Quote,
    pub accrued_funding: Quote,
    pub remaining_margin: Quote,
    pub liquidation_margin: Quote,
    pub liquidation_price: Option<Decimal>,
    pub leverage: Decimal,
    pub can_liquidate: bool,
}

/// Margin math against one view of the funding sequence.
///
/// `current_funding` is the cumulative per-unit funding to diff positions
/// against. Mutating operations pass the freshly appended entry; read-only
/// previews pass the entry the next recomputation would append.
#[derive(Debug, Clone, Copy)]
pub struct MarginCalculator<'a> {
    params: &'a MarketParams,
    funding: &'a FundingSequence,
    current_funding: Decimal,
}

impl<'a> MarginCalculator<'a> {
    pub fn new(params: &'a MarketParams, funding: &'a FundingSequence, current_funding: Decimal) -> Self {
        Self {
            params,
            funding,
            current_funding,
        }
    }

    /// Calculator against the latest recorded funding entry.
    pub fn settled(params: &'a MarketParams, funding: &'a FundingSequence) -> Self {
        Self::new(params, funding, funding.latest())
    }

    pub fn accrued_funding(&self, position: &Position) -> Quote {
        if !position.is_open() {
            return Quote::zero();
        }
        let start = self
            .funding
            .get(position.last_funding_index)
            .unwrap_or(self.current_funding);
        Quote::new(funding::accrued_funding(position.size, self.current_funding - start))
    }

    /// margin + pnl + funding, not floored. negative means the position owes more than it holds.
    pub fn margin_plus_profit_funding(&self, position: &Position, price: Price) -> Quote {
        position
            .margin
            .add(position.profit_loss(price))
            .add(self.accrued_funding(position))
    }

    pub fn remaining_margin(&self, position: &Position, price: Price) -> Quote {
        self.margin_plus_profit_funding(position, price).non_negative()
    }

    pub fn can_liquidate(&self, position: &Position, price: Price) -> bool {
        if !position.is_open() {
            return false;
        }
        self.remaining_margin(position, price) <= liquidation_margin(position.size, price, self.params)
    }

    /// size * price / remaining margin. unbounded when the margin is gone.
    pub fn leverage(&self, position: &Position, price: Price) -> Decimal {
        if !position.is_open() {
            return Decimal::ZERO;
        }
        let remaining = self.remaining_margin(position, price);
        let exposure = multiply_decimal(position.size.value(), price.value());
        match divide_decimal(exposure, remaining.value()) {
            Ok(leverage) => leverage,
            Err(_) if exposure < Decimal::ZERO => Decimal::MIN,
            Err(_) => Decimal::MAX,
        }
    }

    /// Price at which remaining margin meets the liquidation margin.
    ///
    /// The fee term is piecewise (floor, proportional, cap) so the linear
    /// equation is solved once per regime and the self-consistent root kept.
    pub fn liquidation_price(&self, position: &Position) -> Option<Decimal> {
        let last_price = position.last_price?;
        if !position.is_open() {
            return None;
        }

        let size = position.size.value();
        let abs_size = position.size.abs();
        let base = position.margin.add(self.accrued_funding(position)).value();
        let s_times_last = multiply_decimal(size, last_price.value());
        let fee_ratio = self.params.liquidation_fee_ratio;
        let buffer_ratio = self.params.liquidation_buffer_ratio;
        let min_fee = self.params.min_keeper_fee.value();
        let max_fee = self.params.max_keeper_fee.value();

        let flat_denominator = size - multiply_decimal(abs_size, buffer_ratio);
        let proportional_denominator = size - multiply_decimal(abs_size, fee_ratio + buffer_ratio);

        let floor_root = divide_decimal(min_fee + s_times_last - base, flat_denominator).ok();
        let proportional_root = divide_decimal(s_times_last - base, proportional_denominator).ok();
        let cap_root = divide_decimal(max_fee + s_times_last - base, flat_denominator).ok();

        let fee_at = |price: Decimal| multiply_decimal(multiply_decimal(abs_size, price), fee_ratio);

        let root = [
            floor_root.filter(|p| fee_at(*p) <= min_fee),
            proportional_root.filter(|p| {
                let fee = fee_at(*p);
                fee >= min_fee && fee <= max_fee
            }),
            cap_root.filter(|p| fee_at(*p) >= max_fee),
        ]
        .into_iter()
        .flatten()
        .next()
        .or(floor_root)?;

        Some(root.max(Decimal::ZERO))
    }

    pub fn snapshot(&self, position: &Position, price: Price) -> MarginSnapshot {
        MarginSnapshot {
            notional_value: position.notional_value(price),
            profit_loss: position.profit_loss(price),
            accrued_funding: self.accrued_funding(position),
            remaining_margin: self.remaining_margin(position, price),
            liquidation_margin: if position.is_open() {
                liquidation_margin(position.size, price, self.params)
            } else {
                Quote::zero()
            },
            liquidation_price: self.liquidation_price(position),
            leverage: self.leverage(position, price),
            can_liquidate: self.can_liquidate(position, price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionId;
    use rust_decimal_macros::dec;

    fn params() -> MarketParams {
        MarketParams {
            min_keeper_fee: Quote::new(dec!(2)),
            max_keeper_fee: Quote::new(dec!(1000)),
            liquidation_fee_ratio: dec!(0.0035),
            liquidation_buffer_ratio: dec!(0.0025),
            ..MarketParams::default()
        }
    }

    fn position(size: Decimal, margin: Decimal, last: Decimal) -> Position {
        Position {
            id: PositionId(1),
            size: SignedSize::new(size),
            margin: Quote::new(margin),
            last_price: Some(Price::new_unchecked(last)),
            last_funding_index: 0,
        }
    }

    fn price(p: Decimal) -> Price {
        Price::new_unchecked(p)
    }

    #[test]
    fn remaining_margin_includes_pnl_and_funding() {
        let mut seq = FundingSequence::new();
        seq.append(dec!(-2)); // longs paid 2 per unit
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);

        let pos = position(dec!(10), dec!(1000), dec!(200));
        // 1000 + 10*(210-200) + 10*(-2) = 1080
        assert_eq!(calc.remaining_margin(&pos, price(dec!(210))).value(), dec!(1080));
        assert_eq!(calc.accrued_funding(&pos).value(), dec!(-20));
    }

    #[test]
    fn remaining_margin_floors_at_zero() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);

        let pos = position(dec!(10), dec!(100), dec!(200));
        assert_eq!(calc.margin_plus_profit_funding(&pos, price(dec!(180))).value(), dec!(-100));
        assert_eq!(calc.remaining_margin(&pos, price(dec!(180))), Quote::zero());
        assert!(calc.can_liquidate(&pos, price(dec!(180))));
    }

    #[test]
    fn liquidation_fee_bounds() {
        let params = params();
        // notional 100 → 0.35 proportional, floored to 2
        assert_eq!(liquidation_fee(SignedSize::new(dec!(1)), price(dec!(100)), &params).value(), dec!(2));
        // notional 100_000 → 350
        assert_eq!(liquidation_fee(SignedSize::new(dec!(-1000)), price(dec!(100)), &params).value(), dec!(350));
        // notional 1_000_000 → 3500 capped at 1000
        assert_eq!(liquidation_fee(SignedSize::new(dec!(10000)), price(dec!(100)), &params).value(), dec!(1000));
    }

    #[test]
    fn liquidation_margin_adds_buffer() {
        let params = params();
        // notional 10_000: fee 35, buffer 25
        let lm = liquidation_margin(SignedSize::new(dec!(50)), price(dec!(200)), &params);
        assert_eq!(lm.value(), dec!(60));
    }

    #[test]
    fn liquidation_price_long_below_entry() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);
        let pos = position(dec!(50), dec!(1000), dec!(200));

        let liq = calc.liquidation_price(&pos).unwrap();
        assert!(liq < dec!(200));

        // at the liquidation price remaining margin meets the floor
        let at = price(liq);
        let remaining = calc.remaining_margin(&pos, at).value();
        let floor = liquidation_margin(pos.size, at, &params).value();
        assert!((remaining - floor).abs() < dec!(0.0001));
    }

    #[test]
    fn liquidation_price_short_above_entry() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);
        let pos = position(dec!(-50), dec!(1000), dec!(200));

        let liq = calc.liquidation_price(&pos).unwrap();
        assert!(liq > dec!(200));
        let at = price(liq);
        let remaining = calc.remaining_margin(&pos, at).value();
        let floor = liquidation_margin(pos.size, at, &params).value();
        assert!((remaining - floor).abs() < dec!(0.0001));
    }

    #[test]
    fn liquidation_price_uses_fee_floor_for_small_positions() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);
        // notional 100 → fee stuck at the 2 floor
        let pos = position(dec!(1), dec!(20), dec!(100));

        let liq = calc.liquidation_price(&pos).unwrap();
        // 20 + (p - 100) = 2 + 0.0025p → p = 82 / 0.9975
        assert_eq!(liq, divide_decimal(dec!(82), dec!(0.9975)).unwrap());
    }

    #[test]
    fn liquidation_price_clamped_at_zero() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);
        // fully collateralized long never liquidates above zero
        let pos = position(dec!(1), dec!(500), dec!(100));
        assert_eq!(calc.liquidation_price(&pos), Some(Decimal::ZERO));
    }

    #[test]
    fn closed_position_has_no_liquidation_price() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);
        let pos = Position::new(PositionId(1), 0);
        assert_eq!(calc.liquidation_price(&pos), None);
        assert!(!calc.can_liquidate(&pos, price(dec!(1))));
    }

    #[test]
    fn leverage_signed_by_side() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);
        assert_eq!(calc.leverage(&position(dec!(50), dec!(1000), dec!(200)), price(dec!(200))), dec!(10));
        assert_eq!(calc.leverage(&position(dec!(-50), dec!(1000), dec!(200)), price(dec!(200))), dec!(-10));
        assert_eq!(calc.leverage(&position(dec!(50), dec!(0), dec!(200)), price(dec!(200))), Decimal::MAX);
    }

    #[test]
    fn order_fee_taker_when_growing_skew() {
        let fee = order_fee(dec!(50), price(dec!(200)), SignedSize::zero(), dec!(0.0002), dec!(0.0005));
        assert_eq!(fee.value(), dec!(5));
    }

    #[test]
    fn order_fee_maker_when_reducing_skew() {
        let fee = order_fee(dec!(-50), price(dec!(200)), SignedSize::new(dec!(100)), dec!(0.0002), dec!(0.0005));
        assert_eq!(fee.value(), dec!(2));
    }

    #[test]
    fn order_fee_split_when_flipping_skew() {
        // 30 reduces the +30 skew at maker, the remaining 20 grows short skew at taker
        let fee = order_fee(dec!(-50), price(dec!(100)), SignedSize::new(dec!(30)), dec!(0.001), dec!(0.01));
        assert_eq!(fee.value(), dec!(3) + dec!(20));
    }

    #[test]
    fn snapshot_of_open_position() {
        let seq = FundingSequence::new();
        let params = params();
        let calc = MarginCalculator::settled(&params, &seq);
        let snap = calc.snapshot(&position(dec!(50), dec!(1000), dec!(200)), price(dec!(190)));

        assert_eq!(snap.notional_value.value(), dec!(9500));
        assert_eq!(snap.profit_loss.value(), dec!(-500));
        assert_eq!(snap.remaining_margin.value(), dec!(500));
        assert!(!snap.can_liquidate);
        assert!(snap.liquidation_price.is_some());
    }
}
