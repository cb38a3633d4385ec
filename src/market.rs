//! Market state store.
//!
//! A market holds one asset's positions, pending orders, funding history and
//! open-interest accumulators. This module is storage only: the engine decides
//! what changes, this module keeps the aggregates honest when it does.

use crate::funding::{FundingSequence, FundingState};
use crate::order::DelayedOrder;
use crate::position::Position;
use crate::types::{AccountId, MarketKey, PositionId, SignedSize, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why a market stopped accepting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionReason {
    /// Operator pause for upgrades or maintenance
    Maintenance,
    /// Price feed misbehaving
    CircuitBreaker,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarketStatus {
    #[default]
    Active,
    /// Submit, execute and margin transfers fail. cancel and liquidate keep working.
    Suspended(SuspensionReason),
}

impl MarketStatus {
    pub fn is_suspended(&self) -> bool {
        matches!(self, MarketStatus::Suspended(_))
    }
}

/// Open interest accumulators. `size` is the sum of |position size|, `skew` the signed sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarketAggregates {
    pub size: Decimal,
    pub skew: SignedSize,
}

impl MarketAggregates {
    /// Fold one position's resize from `old` to `new` into the totals.
    pub fn apply_resize(&mut self, old: SignedSize, new: SignedSize) {
        self.size = self.size - old.abs() + new.abs();
        self.skew = self.skew.add(new.value() - old.value());
    }

    pub fn long_size(&self) -> Decimal {
        (self.size + self.skew.value()) / Decimal::TWO
    }

    pub fn short_size(&self) -> Decimal {
        (self.size - self.skew.value()) / Decimal::TWO
    }

    /// Holds whenever the aggregates match some set of positions.
    pub fn is_consistent(&self) -> bool {
        self.size >= Decimal::ZERO && self.size >= self.skew.abs()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub key: MarketKey,
    /// Oracle asset this market tracks (e.g. "sETH").
    pub asset: String,
    pub status: MarketStatus,
    pub positions: HashMap<AccountId, Position>,
    pub orders: HashMap<AccountId, DelayedOrder>,
    pub funding: FundingSequence,
    pub funding_state: FundingState,
    pub aggregates: MarketAggregates,
    pub(crate) next_position_id: u64,
}

impl MarketState {
    pub fn new(key: MarketKey, asset: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            key,
            asset: asset.into(),
            status: MarketStatus::Active,
            positions: HashMap::new(),
            orders: HashMap::new(),
            funding: FundingSequence::new(),
            funding_state: FundingState::new(timestamp),
            aggregates: MarketAggregates::default(),
            next_position_id: 1,
        }
    }

    pub fn position(&self, account: AccountId) -> Option<&Position> {
        self.positions.get(&account)
    }

    pub fn order(&self, account: AccountId) -> Option<&DelayedOrder> {
        self.orders.get(&account)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = (&AccountId, &Position)> {
        self.positions.iter().filter(|(_, p)| p.is_open())
    }

    pub fn peek_position_id(&self) -> PositionId {
        PositionId(self.next_position_id)
    }

    /// Sum over open positions, recomputed from scratch. the stored aggregates must always equal this.
    pub fn recount_aggregates(&self) -> MarketAggregates {
        let mut totals = MarketAggregates::default();
        for position in self.positions.values() {
            totals.apply_resize(SignedSize::zero(), position.size);
        }
        totals
    }
}
