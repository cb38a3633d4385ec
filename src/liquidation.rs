//! Liquidation conditions.
//!
//! A position is liquidatable once its remaining margin can no longer cover the
//! liquidation margin. The liquidator is paid the liquidation fee; whatever is
//! left of the margin after that stays with the market, and an underwater
//! position's deficit is absorbed by it.

use crate::config::MarketParams;
use crate::margin::{self, MarginCalculator};
use crate::position::Position;
use crate::types::{Price, Quote};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    /// `buffer` is how much margin can still be lost before liquidation.
    Safe { buffer: Quote },
    /// `shortfall` is how far remaining margin sits under the liquidation margin.
    Liquidatable { shortfall: Quote },
}

impl LiquidationStatus {
    pub fn is_liquidatable(&self) -> bool {
        matches!(self, LiquidationStatus::Liquidatable { .. })
    }
}

/// What liquidating a position at a given price pays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationAssessment {
    pub fee: Quote,
    pub liquidation_margin: Quote,
    /// margin + pnl + funding, not floored
    pub margin_with_profit_funding: Quote,
    pub market_absorbed: Quote,
}

pub fn liquidation_status(
    calc: &MarginCalculator<'_>,
    position: &Position,
    price: Price,
    params: &MarketParams,
) -> Option<LiquidationStatus> {
    if !position.is_open() {
        return None;
    }
    let remaining = calc.remaining_margin(position, price);
    let floor = margin::liquidation_margin(position.size, price, params);
    if calc.can_liquidate(position, price) {
        Some(LiquidationStatus::Liquidatable {
            shortfall: floor.sub(remaining),
        })
    } else {
        Some(LiquidationStatus::Safe {
            buffer: remaining.sub(floor),
        })
    }
}

/// `None` unless the position is open and liquidatable at `price`.
pub fn assess_liquidation(
    calc: &MarginCalculator<'_>,
    position: &Position,
    price: Price,
    params: &MarketParams,
) -> Option<LiquidationAssessment> {
    if !calc.can_liquidate(position, price) {
        return None;
    }
    let fee = margin::liquidation_fee(position.size, price, params);
    let margin_with_profit_funding = calc.margin_plus_profit_funding(position, price);
    Some(LiquidationAssessment {
        fee,
        liquidation_margin: margin::liquidation_margin(position.size, price, params),
        margin_with_profit_funding,
        market_absorbed: margin_with_profit_funding.sub(fee),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funding::FundingSequence;
    use crate::types::{PositionId, SignedSize};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn long(margin: Decimal) -> Position {
        Position {
            id: PositionId(9),
            size: SignedSize::new(dec!(50)),
            margin: Quote::new(margin),
            last_price: Some(Price::new_unchecked(dec!(200))),
            last_funding_index: 0,
        }
    }

    #[test]
    fn safe_position_reports_buffer() {
        let params = MarketParams::default();
        let seq = FundingSequence::new();
        let calc = MarginCalculator::settled(&params, &seq);

        let status = liquidation_status(&calc, &long(dec!(1000)), Price::new_unchecked(dec!(200)), &params).unwrap();
        // liquidation margin at 10_000 notional: 35 + 25
        assert_eq!(status, LiquidationStatus::Safe { buffer: Quote::new(dec!(940)) });
    }

    #[test]
    fn underwater_position_absorbed_by_market() {
        let params = MarketParams::default();
        let seq = FundingSequence::new();
        let calc = MarginCalculator::settled(&params, &seq);
        let price = Price::new_unchecked(dec!(180));

        // 1000 - 50*20 = 0 left
        let assessment = assess_liquidation(&calc, &long(dec!(1000)), price, &params).unwrap();
        assert_eq!(assessment.fee.value(), dec!(31.5));
        assert_eq!(assessment.margin_with_profit_funding, Quote::zero());
        assert_eq!(assessment.market_absorbed.value(), dec!(-31.5));

        let status = liquidation_status(&calc, &long(dec!(1000)), price, &params).unwrap();
        assert!(status.is_liquidatable());
    }

    #[test]
    fn healthy_position_not_assessed() {
        let params = MarketParams::default();
        let seq = FundingSequence::new();
        let calc = MarginCalculator::settled(&params, &seq);
        assert!(assess_liquidation(&calc, &long(dec!(1000)), Price::new_unchecked(dec!(199)), &params).is_none());
        assert!(liquidation_status(&calc, &Position::new(PositionId(1), 0), Price::new_unchecked(dec!(1)), &params).is_none());
    }
}
