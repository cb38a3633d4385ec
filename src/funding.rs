// 5.0: funding. skew drives a funding *velocity*: while longs outweigh shorts the daily rate
// keeps drifting up (longs pay more), and vice versa. the rate is integrated into a cumulative
// per-unit funding sequence that positions diff against.
// 5.0 has the sequence + state, 5.1+ the rate math.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::MarketParams;
use crate::math::{clamp, divide_decimal, multiply_decimal, round_unit};
use crate::types::{Price, SignedSize, Timestamp};

/// Append-only log of cumulative funding per unit of size.
///
/// Index 0 holds the sentinel `0` so a position that never accrued funding
/// can still point at a valid entry. Indices are stable forever: entries are
/// never rewritten or compacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingSequence {
    entries: Vec<Decimal>,
}

impl Default for FundingSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl FundingSequence {
    pub fn new() -> Self {
        Self {
            entries: vec![Decimal::ZERO],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn latest_index(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn latest(&self) -> Decimal {
        self.entries[self.latest_index()]
    }

    pub fn get(&self, index: usize) -> Option<Decimal> {
        self.entries.get(index).copied()
    }

    /// Append a cumulative value and return its index.
    pub fn append(&mut self, cumulative: Decimal) -> usize {
        self.entries.push(cumulative);
        self.latest_index()
    }

    /// Funding per unit accumulated between `index` and the latest entry.
    /// Out-of-range indices read as the latest entry (nothing owed).
    pub fn funding_since(&self, index: usize) -> Decimal {
        let start = self.get(index).unwrap_or_else(|| self.latest());
        self.latest() - start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingState {
    pub last_recomputed: Timestamp,
    // daily rate as a fraction, positive = longs pay shorts
    pub rate_last_recomputed: Decimal,
}

impl FundingState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            last_recomputed: timestamp,
            rate_last_recomputed: Decimal::ZERO,
        }
    }
}

// 5.1: skew relative to the scale, clamped to [-1, 1]
pub fn proportional_skew(skew: SignedSize, skew_scale: Decimal) -> Decimal {
    let ratio = divide_decimal(skew.value(), skew_scale).unwrap_or(Decimal::ZERO);
    clamp(ratio, dec!(-1), Decimal::ONE)
}

// 5.2: how fast the daily rate moves, per day
pub fn funding_velocity(skew: SignedSize, params: &MarketParams) -> Decimal {
    multiply_decimal(
        proportional_skew(skew, params.skew_scale),
        params.max_funding_velocity,
    )
}

// 5.3: rate right now: last recorded rate drifted by velocity over the elapsed days
pub fn current_funding_rate(
    state: &FundingState,
    skew: SignedSize,
    now: Timestamp,
    params: &MarketParams,
) -> Decimal {
    let elapsed_days = now.days_since(state.last_recomputed);
    state.rate_last_recomputed + multiply_decimal(funding_velocity(skew, params), elapsed_days)
}

// 5.4: per-unit funding not yet in the sequence. the rate moves linearly between
// recomputations so the average of both endpoints integrates it exactly.
// sign: a positive rate makes longs pay, so the per-unit value longs receive goes down.
pub fn unrecorded_funding(
    state: &FundingState,
    skew: SignedSize,
    price: Price,
    now: Timestamp,
    params: &MarketParams,
) -> Decimal {
    let elapsed_days = now.days_since(state.last_recomputed);
    if elapsed_days.is_zero() {
        return Decimal::ZERO;
    }
    let current = current_funding_rate(state, skew, now, params);
    let average_rate = (state.rate_last_recomputed + current) / dec!(2);
    -round_unit(average_rate * elapsed_days * price.value())
}

pub fn next_funding_entry(
    sequence: &FundingSequence,
    state: &FundingState,
    skew: SignedSize,
    price: Price,
    now: Timestamp,
    params: &MarketParams,
) -> Decimal {
    sequence.latest() + unrecorded_funding(state, skew, price, now, params)
}

/// Funding a position of `size` is owed (positive) or owes (negative) per unit delta.
pub fn accrued_funding(size: SignedSize, per_unit: Decimal) -> Decimal {
    multiply_decimal(size.value(), per_unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> MarketParams {
        MarketParams {
            skew_scale: dec!(1000),
            max_funding_velocity: dec!(0.1),
            ..MarketParams::default()
        }
    }

    #[test]
    fn sequence_starts_with_sentinel() {
        let seq = FundingSequence::new();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.latest_index(), 0);
        assert_eq!(seq.latest(), Decimal::ZERO);
    }

    #[test]
    fn sequence_append_and_diff() {
        let mut seq = FundingSequence::new();
        assert_eq!(seq.append(dec!(-1.5)), 1);
        assert_eq!(seq.append(dec!(-4)), 2);

        assert_eq!(seq.funding_since(0), dec!(-4));
        assert_eq!(seq.funding_since(1), dec!(-2.5));
        assert_eq!(seq.funding_since(2), Decimal::ZERO);
        assert_eq!(seq.funding_since(99), Decimal::ZERO);
    }

    #[test]
    fn proportional_skew_clamped() {
        assert_eq!(proportional_skew(SignedSize::new(dec!(500)), dec!(1000)), dec!(0.5));
        assert_eq!(proportional_skew(SignedSize::new(dec!(5000)), dec!(1000)), dec!(1));
        assert_eq!(proportional_skew(SignedSize::new(dec!(-5000)), dec!(1000)), dec!(-1));
    }

    #[test]
    fn rate_drifts_with_skew() {
        let state = FundingState::new(Timestamp::from_secs(0));
        let one_day = Timestamp::from_secs(86_400);

        // half skew → velocity 0.05/day
        let rate = current_funding_rate(&state, SignedSize::new(dec!(500)), one_day, &params());
        assert_eq!(rate, dec!(0.05));

        let rate = current_funding_rate(&state, SignedSize::new(dec!(-500)), one_day, &params());
        assert_eq!(rate, dec!(-0.05));
    }

    #[test]
    fn unrecorded_funding_uses_average_rate() {
        let state = FundingState::new(Timestamp::from_secs(0));
        let one_day = Timestamp::from_secs(86_400);
        let price = Price::new_unchecked(dec!(100));

        // rate goes 0 → 0.05, average 0.025, over 1 day at price 100 → 2.5 per unit, longs pay
        let funding = unrecorded_funding(&state, SignedSize::new(dec!(500)), price, one_day, &params());
        assert_eq!(funding, dec!(-2.5));
    }

    #[test]
    fn no_time_no_funding() {
        let mut state = FundingState::new(Timestamp::from_secs(10));
        state.rate_last_recomputed = dec!(0.3);
        let funding = unrecorded_funding(
            &state,
            SignedSize::new(dec!(500)),
            Price::new_unchecked(dec!(100)),
            Timestamp::from_secs(10),
            &params(),
        );
        assert_eq!(funding, Decimal::ZERO);
    }

    #[test]
    fn balanced_market_keeps_rate() {
        let mut state = FundingState::new(Timestamp::from_secs(0));
        state.rate_last_recomputed = dec!(0.01);
        let later = Timestamp::from_secs(43_200);

        let rate = current_funding_rate(&state, SignedSize::zero(), later, &params());
        assert_eq!(rate, dec!(0.01));
        let next = next_funding_entry(
            &FundingSequence::new(),
            &state,
            SignedSize::zero(),
            Price::new_unchecked(dec!(200)),
            later,
            &params(),
        );
        // 0.01 * 0.5 day * 200
        assert_eq!(next, dec!(-1));
    }

    #[test]
    fn accrued_funding_scales_with_size() {
        assert_eq!(accrued_funding(SignedSize::new(dec!(2)), dec!(-1.5)), dec!(-3));
        assert_eq!(accrued_funding(SignedSize::new(dec!(-2)), dec!(-1.5)), dec!(3));
    }
}
