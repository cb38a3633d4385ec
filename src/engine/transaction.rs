// 8.0.3 engine/transaction.rs: copy-on-write staging for one operation.
// reads fall through to the committed market state, writes land in the staged changes.
// nothing touches the market or the ledger until the engine commits the finished changes,
// so any `?` in between leaves no trace.

use crate::config::MarketParams;
use crate::events::EventPayload;
use crate::funding::FundingState;
use crate::ledger::LedgerInstruction;
use crate::margin::MarginCalculator;
use crate::market::{MarketAggregates, MarketState};
use crate::order::DelayedOrder;
use crate::position::Position;
use crate::types::{AccountId, PositionId, SignedSize};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Everything an operation wants to change, ready to apply.
#[derive(Debug, Clone)]
pub(crate) struct StagedChanges {
    positions: HashMap<AccountId, Position>,
    // None = order removed
    orders: HashMap<AccountId, Option<DelayedOrder>>,
    aggregates: MarketAggregates,
    funding_append: Option<Decimal>,
    funding_state: FundingState,
    next_position_id: u64,
    pub(crate) events: Vec<EventPayload>,
    pub(crate) ledger: Vec<LedgerInstruction>,
}

impl StagedChanges {
    /// Write the staged state into `state` and hand back the events to record.
    pub(crate) fn apply_to(self, state: &mut MarketState) -> Vec<EventPayload> {
        state.positions.extend(self.positions);
        for (account, order) in self.orders {
            match order {
                Some(order) => {
                    state.orders.insert(account, order);
                }
                None => {
                    state.orders.remove(&account);
                }
            }
        }
        if let Some(entry) = self.funding_append {
            state.funding.append(entry);
        }
        state.funding_state = self.funding_state;
        state.aggregates = self.aggregates;
        state.next_position_id = self.next_position_id;
        self.events
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.positions.is_empty()
            && self.orders.is_empty()
            && self.funding_append.is_none()
            && self.events.is_empty()
            && self.ledger.is_empty()
    }
}

pub struct MarketTransaction<'a> {
    base: &'a MarketState,
    changes: StagedChanges,
}

impl<'a> MarketTransaction<'a> {
    pub fn begin(base: &'a MarketState) -> Self {
        Self {
            base,
            changes: StagedChanges {
                positions: HashMap::new(),
                orders: HashMap::new(),
                aggregates: base.aggregates,
                funding_append: None,
                funding_state: base.funding_state.clone(),
                next_position_id: base.next_position_id,
                events: Vec::new(),
                ledger: Vec::new(),
            },
        }
    }

    pub fn base(&self) -> &'a MarketState {
        self.base
    }

    // positions

    pub fn position(&self, account: AccountId) -> Option<Position> {
        self.changes
            .positions
            .get(&account)
            .or_else(|| self.base.position(account))
            .cloned()
    }

    /// The account's position, or an empty one carrying the id it would be stored under.
    pub fn position_or_new(&self, account: AccountId) -> Position {
        self.position(account).unwrap_or_else(|| {
            Position::new(PositionId(self.changes.next_position_id), self.latest_funding_index())
        })
    }

    /// Stage `position` for `account`, keeping size/skew in step with the resize.
    pub fn put_position(&mut self, account: AccountId, position: Position) {
        let old_size = match self.position(account) {
            Some(existing) => existing.size,
            None => {
                self.changes.next_position_id += 1;
                SignedSize::zero()
            }
        };
        self.changes.aggregates.apply_resize(old_size, position.size);
        self.changes.positions.insert(account, position);
    }

    // orders

    pub fn order(&self, account: AccountId) -> Option<&DelayedOrder> {
        match self.changes.orders.get(&account) {
            Some(staged) => staged.as_ref(),
            None => self.base.order(account),
        }
    }

    pub fn put_order(&mut self, account: AccountId, order: DelayedOrder) {
        self.changes.orders.insert(account, Some(order));
    }

    pub fn remove_order(&mut self, account: AccountId) -> Option<DelayedOrder> {
        let existing = self.order(account).cloned();
        if existing.is_some() {
            self.changes.orders.insert(account, None);
        }
        existing
    }

    // aggregates and funding

    pub fn aggregates(&self) -> MarketAggregates {
        self.changes.aggregates
    }

    pub fn skew(&self) -> SignedSize {
        self.changes.aggregates.skew
    }

    pub fn funding_state(&self) -> &FundingState {
        &self.changes.funding_state
    }

    pub fn funding_recomputed(&self) -> bool {
        self.changes.funding_append.is_some()
    }

    pub fn latest_funding(&self) -> Decimal {
        self.changes
            .funding_append
            .unwrap_or_else(|| self.base.funding.latest())
    }

    pub fn latest_funding_index(&self) -> usize {
        match self.changes.funding_append {
            Some(_) => self.base.funding.len(),
            None => self.base.funding.latest_index(),
        }
    }

    /// Stage the next cumulative funding entry. at most one append per operation.
    pub fn record_funding(&mut self, entry: Decimal, state: FundingState) -> usize {
        if self.changes.funding_append.is_none() {
            self.changes.funding_append = Some(entry);
            self.changes.funding_state = state;
        }
        self.latest_funding_index()
    }

    /// Margin math against the funding this transaction sees, staged entry included.
    /// a staged index is not in the committed sequence yet, so it reads as the latest entry.
    pub fn calculator<'p>(&'p self, params: &'p MarketParams) -> MarginCalculator<'p> {
        MarginCalculator::new(params, &self.base.funding, self.latest_funding())
    }

    // side effects

    pub fn emit(&mut self, payload: EventPayload) {
        self.changes.events.push(payload);
    }

    pub fn settle(&mut self, instruction: LedgerInstruction) {
        let amount = match &instruction {
            LedgerInstruction::Issue { amount, .. }
            | LedgerInstruction::Burn { amount, .. }
            | LedgerInstruction::PayFee { amount, .. } => *amount,
        };
        if !amount.is_zero() {
            self.changes.ledger.push(instruction);
        }
    }

    pub fn staged_ledger(&self) -> &[LedgerInstruction] {
        &self.changes.ledger
    }

    pub(crate) fn finish(self) -> StagedChanges {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketKey, Quote, Timestamp};
    use rust_decimal_macros::dec;

    fn market() -> MarketState {
        MarketState::new(MarketKey::new("sETH-PERP"), "sETH", Timestamp::from_secs(0))
    }

    fn sized(id: u64, size: Decimal) -> Position {
        let mut pos = Position::new(PositionId(id), 0);
        pos.size = SignedSize::new(size);
        pos.margin = Quote::new(dec!(100));
        pos
    }

    #[test]
    fn staged_writes_invisible_until_applied() {
        let mut state = market();
        let changes = {
            let mut tx = MarketTransaction::begin(&state);
            let pos = tx.position_or_new(AccountId(1));
            assert_eq!(pos.id, PositionId(1));
            tx.put_position(AccountId(1), sized(1, dec!(5)));
            assert_eq!(tx.skew().value(), dec!(5));
            assert!(tx.base().position(AccountId(1)).is_none());
            tx.finish()
        };
        assert!(state.position(AccountId(1)).is_none());

        changes.apply_to(&mut state);
        assert_eq!(state.position(AccountId(1)).unwrap().size.value(), dec!(5));
        assert_eq!(state.aggregates.size, dec!(5));
        assert_eq!(state.peek_position_id(), PositionId(2));
    }

    #[test]
    fn dropped_transaction_changes_nothing() {
        let state = market();
        {
            let mut tx = MarketTransaction::begin(&state);
            tx.put_position(AccountId(1), sized(1, dec!(-3)));
            tx.record_funding(dec!(-1), FundingState::new(Timestamp::from_secs(9)));
        }
        assert!(state.positions.is_empty());
        assert_eq!(state.funding.len(), 1);
        assert_eq!(state.aggregates, MarketAggregates::default());
    }

    #[test]
    fn resizes_update_aggregates_once() {
        let state = market();
        let mut tx = MarketTransaction::begin(&state);
        tx.put_position(AccountId(1), sized(1, dec!(10)));
        tx.put_position(AccountId(1), sized(1, dec!(4)));
        tx.put_position(AccountId(2), sized(2, dec!(-6)));

        let agg = tx.aggregates();
        assert_eq!(agg.size, dec!(10));
        assert_eq!(agg.skew.value(), dec!(-2));
        // second account got the next id
        assert_eq!(tx.finish().next_position_id, 3);
    }

    #[test]
    fn funding_append_staged_once() {
        let state = market();
        let mut tx = MarketTransaction::begin(&state);
        assert_eq!(tx.latest_funding_index(), 0);

        let index = tx.record_funding(dec!(-2), FundingState::new(Timestamp::from_secs(60)));
        assert_eq!(index, 1);
        assert_eq!(tx.latest_funding(), dec!(-2));
        // a second append in the same operation is ignored
        assert_eq!(tx.record_funding(dec!(-9), FundingState::new(Timestamp::from_secs(61))), 1);
        assert_eq!(tx.latest_funding(), dec!(-2));
        assert!(tx.funding_recomputed());
    }

    #[test]
    fn order_removal_staged() {
        let mut state = market();
        state.orders.insert(
            AccountId(1),
            DelayedOrder {
                kind: crate::order::OrderKind::NextPrice,
                size_delta: dec!(1),
                price_bound: None,
                target_round_id: crate::types::RoundId(2),
                commit_deposit: Quote::new(dec!(1)),
                keeper_deposit: Quote::new(dec!(2)),
                executable_at: Timestamp::from_secs(0),
                intention_time: Timestamp::from_secs(0),
                tracking_code: None,
            },
        );

        let mut tx = MarketTransaction::begin(&state);
        assert!(tx.remove_order(AccountId(1)).is_some());
        assert!(tx.order(AccountId(1)).is_none());
        assert!(tx.remove_order(AccountId(1)).is_none());
        let changes = tx.finish();

        changes.apply_to(&mut state);
        assert!(state.orders.is_empty());
    }

    #[test]
    fn zero_ledger_amounts_skipped() {
        let state = market();
        let mut tx = MarketTransaction::begin(&state);
        tx.settle(LedgerInstruction::PayFee {
            amount: Quote::zero(),
            tracking_code: None,
        });
        tx.settle(LedgerInstruction::Issue {
            account: AccountId(1),
            amount: Quote::new(dec!(2)),
        });
        assert_eq!(tx.staged_ledger().len(), 1);
        assert!(!tx.finish().is_empty());
    }
}
