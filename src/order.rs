// 2.0: deferred orders. an order is a request to change a position at a price that does not
// exist yet. it is committed now, pre-paying the fee (commit deposit) and a flat keeper
// incentive, and settled later against the oracle.
// 2.1 has the request builder, 2.2 the confirmation window rules, 2.3 fill price selection.

use crate::config::MarketParams;
use crate::math::{checked_add, checked_multiply};
use crate::types::{Price, Quote, RoundId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How an order becomes eligible for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Eligible once the oracle publishes the round after submission.
    NextPrice,
    /// Eligible once a caller-chosen delay has passed.
    Delayed,
}

/// A committed order waiting for its price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedOrder {
    pub kind: OrderKind,
    pub size_delta: Decimal,
    /// Worst fill price the owner accepts, derived from their price impact tolerance.
    pub price_bound: Option<Price>,
    pub target_round_id: RoundId,
    pub commit_deposit: Quote,
    pub keeper_deposit: Quote,
    pub executable_at: Timestamp,
    pub intention_time: Timestamp,
    pub tracking_code: Option<String>,
}

// 2.1: what the caller asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub kind: OrderKind,
    pub size_delta: Decimal,
    /// Max relative distance between the submission price and the fill, e.g. 0.01.
    pub price_impact_delta: Option<Decimal>,
    /// Seconds to wait before a `Delayed` order becomes executable. defaults to the market minimum.
    pub desired_delay: Option<u64>,
    pub tracking_code: Option<String>,
}

impl OrderRequest {
    pub fn next_price(size_delta: Decimal) -> Self {
        Self {
            kind: OrderKind::NextPrice,
            size_delta,
            price_impact_delta: None,
            desired_delay: None,
            tracking_code: None,
        }
    }

    pub fn delayed(size_delta: Decimal, desired_delay: Option<u64>) -> Self {
        Self {
            kind: OrderKind::Delayed,
            size_delta,
            price_impact_delta: None,
            desired_delay,
            tracking_code: None,
        }
    }

    pub fn with_price_impact(mut self, delta: Decimal) -> Self {
        self.price_impact_delta = Some(delta);
        self
    }

    pub fn with_tracking_code(mut self, code: impl Into<String>) -> Self {
        self.tracking_code = Some(code.into());
        self
    }
}

/// Where an execution takes its fill price from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPriceSource {
    TargetRound(RoundId),
    Latest,
}

/// Worst acceptable fill for a trade of `size_delta` around `reference`.
/// longs cap the price from above, shorts from below.
pub fn price_bound(size_delta: Decimal, reference: Price, price_impact_delta: Decimal) -> Option<Price> {
    let shift = checked_multiply(reference.value(), price_impact_delta.abs()).ok()?;
    if size_delta > Decimal::ZERO {
        Price::new(checked_add(reference.value(), shift).ok()?)
    } else {
        Price::new(reference.value() - shift)
    }
}

impl DelayedOrder {
    pub fn total_deposit(&self) -> Quote {
        self.commit_deposit.add(self.keeper_deposit)
    }

    // 2.2: window rules. both windows start at the order's own gate: the target round,
    // and the time it became executable.
    pub fn round_window_over(&self, current_round: RoundId, params: &MarketParams) -> bool {
        current_round > self.target_round_id
            && current_round.rounds_since(self.target_round_id) > params.confirmation_window_rounds
    }

    pub fn time_window_over(&self, now: Timestamp, params: &MarketParams) -> bool {
        now > self.executable_at
            && now.seconds_since(self.executable_at) > Decimal::from(params.confirmation_window_seconds)
    }

    /// Too old to execute: only cancel remains, and keepers may do it.
    pub fn is_expired(&self, current_round: RoundId, now: Timestamp, params: &MarketParams) -> bool {
        match self.kind {
            // the time window is a grace period on top of the round window
            OrderKind::NextPrice => {
                self.round_window_over(current_round, params) && self.time_window_over(now, params)
            }
            OrderKind::Delayed => self.time_window_over(now, params),
        }
    }

    /// Next-price orders wait for their target round. Delayed orders wait for their delay
    /// and also for a round newer than the one seen at submission.
    pub fn is_executable(&self, current_round: RoundId, now: Timestamp) -> bool {
        let round_reached = current_round >= self.target_round_id;
        match self.kind {
            OrderKind::NextPrice => round_reached,
            OrderKind::Delayed => round_reached && now >= self.executable_at,
        }
    }

    // 2.3: target round price while the round window is open, otherwise the latest price
    pub fn fill_price_source(&self, current_round: RoundId, params: &MarketParams) -> FillPriceSource {
        if current_round >= self.target_round_id && !self.round_window_over(current_round, params) {
            FillPriceSource::TargetRound(self.target_round_id)
        } else {
            FillPriceSource::Latest
        }
    }

    pub fn accepts_fill(&self, fill: Price) -> bool {
        match self.price_bound {
            None => true,
            Some(bound) if self.size_delta > Decimal::ZERO => fill <= bound,
            Some(bound) => fill >= bound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> MarketParams {
        MarketParams {
            confirmation_window_rounds: 2,
            confirmation_window_seconds: 120,
            ..MarketParams::default()
        }
    }

    fn order(kind: OrderKind) -> DelayedOrder {
        DelayedOrder {
            kind,
            size_delta: dec!(50),
            price_bound: None,
            target_round_id: RoundId(5),
            commit_deposit: Quote::new(dec!(5)),
            keeper_deposit: Quote::new(dec!(2)),
            executable_at: Timestamp::from_secs(1000),
            intention_time: Timestamp::from_secs(1000),
            tracking_code: None,
        }
    }

    #[test]
    fn next_price_gated_on_round() {
        let o = order(OrderKind::NextPrice);
        assert!(!o.is_executable(RoundId(4), Timestamp::from_secs(5000)));
        assert!(o.is_executable(RoundId(5), Timestamp::from_secs(1000)));
    }

    #[test]
    fn delayed_gated_on_time_and_round() {
        let mut o = order(OrderKind::Delayed);
        o.executable_at = Timestamp::from_secs(1060);
        assert!(!o.is_executable(RoundId(9), Timestamp::from_secs(1059)));
        assert!(o.is_executable(RoundId(5), Timestamp::from_secs(1060)));
        // delay over but the submission round is still the latest
        assert!(!o.is_executable(RoundId(4), Timestamp::from_secs(5000)));
    }

    #[test]
    fn round_window() {
        let o = order(OrderKind::NextPrice);
        assert!(!o.round_window_over(RoundId(7), &params())); // 2 rounds past target
        assert!(o.round_window_over(RoundId(8), &params()));
    }

    #[test]
    fn next_price_expiry_needs_both_windows() {
        let o = order(OrderKind::NextPrice);
        // rounds elapsed, still inside the time grace
        assert!(!o.is_expired(RoundId(8), Timestamp::from_secs(1100), &params()));
        // time elapsed, rounds not
        assert!(!o.is_expired(RoundId(6), Timestamp::from_secs(2000), &params()));
        assert!(o.is_expired(RoundId(8), Timestamp::from_secs(1121), &params()));
    }

    #[test]
    fn delayed_expiry_on_time_only() {
        let o = order(OrderKind::Delayed);
        assert!(!o.is_expired(RoundId(100), Timestamp::from_secs(1120), &params()));
        assert!(o.is_expired(RoundId(1), Timestamp::from_secs(1121), &params()));
    }

    #[test]
    fn fill_source_switches_to_latest_after_round_window() {
        let o = order(OrderKind::NextPrice);
        assert_eq!(o.fill_price_source(RoundId(5), &params()), FillPriceSource::TargetRound(RoundId(5)));
        assert_eq!(o.fill_price_source(RoundId(7), &params()), FillPriceSource::TargetRound(RoundId(5)));
        assert_eq!(o.fill_price_source(RoundId(8), &params()), FillPriceSource::Latest);
    }

    #[test]
    fn price_bound_by_direction() {
        let reference = Price::new_unchecked(dec!(200));
        assert_eq!(price_bound(dec!(1), reference, dec!(0.01)).unwrap().value(), dec!(202));
        assert_eq!(price_bound(dec!(-1), reference, dec!(0.01)).unwrap().value(), dec!(198));

        let mut long = order(OrderKind::NextPrice);
        long.price_bound = price_bound(long.size_delta, reference, dec!(0.01));
        assert!(long.accepts_fill(Price::new_unchecked(dec!(201))));
        assert!(!long.accepts_fill(Price::new_unchecked(dec!(203))));

        let mut short = order(OrderKind::NextPrice);
        short.size_delta = dec!(-50);
        short.price_bound = price_bound(short.size_delta, reference, dec!(0.01));
        assert!(short.accepts_fill(Price::new_unchecked(dec!(199))));
        assert!(!short.accepts_fill(Price::new_unchecked(dec!(197))));
    }

    #[test]
    fn request_builder() {
        let req = OrderRequest::delayed(dec!(-3), Some(90))
            .with_price_impact(dec!(0.02))
            .with_tracking_code("ui");
        assert_eq!(req.kind, OrderKind::Delayed);
        assert_eq!(req.desired_delay, Some(90));
        assert_eq!(req.price_impact_delta, Some(dec!(0.02)));
        assert_eq!(req.tracking_code.as_deref(), Some("ui"));
        assert_eq!(order(OrderKind::Delayed).total_deposit().value(), dec!(7));
    }
}
