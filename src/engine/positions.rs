//! Position management: trades, margin updates, margin transfers and previews.

use super::core::Market;
use super::results::EngineError;
use super::transaction::MarketTransaction;
use crate::config::{FeeSchedule, MarketParams};
use crate::events::{EventPayload, MarginTransferredEvent, PositionModifiedEvent, TrackingEvent};
use crate::ledger::LedgerInstruction;
use crate::margin::{self, MarginCalculator, MarginSnapshot};
use crate::math::{checked_add, checked_multiply, divide_decimal, multiply_decimal};
use crate::position::Position;
use crate::types::{AccountId, Price, Quote, SignedSize};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

// slack on the leverage cap so a position opened at exactly max leverage survives rounding
const LEVERAGE_TOLERANCE: Decimal = dec!(0.01);

/// One trade against the market at a known fill price.
#[derive(Debug, Clone)]
pub(super) struct TradeParams<'t> {
    pub size_delta: Decimal,
    pub price: Price,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub tracking_code: Option<&'t str>,
}

#[derive(Debug, Clone)]
pub(super) struct TradeOutcome {
    pub position: Position,
    pub fee: Quote,
}

impl Market {
    /// The position a trade would leave behind, or the reason it would be refused.
    /// stages nothing.
    pub(super) fn post_trade_details(
        &self,
        tx: &MarketTransaction<'_>,
        params: &MarketParams,
        position: &Position,
        trade: &TradeParams<'_>,
    ) -> Result<TradeOutcome, EngineError> {
        ensure_representable(tx, position, trade)?;
        let calc = tx.calculator(params);
        let fee = margin::order_fee(trade.size_delta, trade.price, tx.skew(), trade.maker_fee, trade.taker_fee);
        let new_size = position.size.add(trade.size_delta);
        let new_margin = calc.margin_plus_profit_funding(position, trade.price).sub(fee);

        if new_margin.is_negative() {
            return Err(EngineError::InsufficientMargin {
                margin: new_margin,
                required: Quote::zero(),
            });
        }

        let new_position = Position {
            id: position.id,
            size: new_size,
            margin: new_margin,
            last_price: Some(trade.price),
            last_funding_index: tx.latest_funding_index(),
        };
        if new_size.is_zero() {
            return Ok(TradeOutcome {
                position: new_position,
                fee,
            });
        }

        if new_margin < params.min_initial_margin {
            return Err(EngineError::InsufficientMargin {
                margin: new_margin,
                required: params.min_initial_margin,
            });
        }
        if calc.can_liquidate(&new_position, trade.price) {
            return Err(EngineError::CanLiquidate);
        }

        // leverage against the margin before the fee came out
        let exposure = multiply_decimal(new_size.value(), trade.price.value());
        let leverage = divide_decimal(exposure, new_margin.add(fee).value()).unwrap_or(Decimal::MAX);
        if leverage.abs() > params.max_leverage + LEVERAGE_TOLERANCE {
            return Err(EngineError::MaxLeverageExceeded {
                leverage,
                max: params.max_leverage,
            });
        }

        if let Some(value) = side_over_limit(tx, params, position.size, new_size, trade.price) {
            return Err(EngineError::MaxMarketSizeExceeded {
                value,
                max: params.max_market_value,
            });
        }

        Ok(TradeOutcome {
            position: new_position,
            fee,
        })
    }

    /// Trade `account`'s position and stage the fee payment.
    pub(super) fn apply_trade(
        &self,
        tx: &mut MarketTransaction<'_>,
        params: &MarketParams,
        account: AccountId,
        trade: TradeParams<'_>,
    ) -> Result<TradeOutcome, EngineError> {
        let position = tx.position_or_new(account);
        let outcome = self.post_trade_details(tx, params, &position, &trade)?;

        tx.put_position(account, outcome.position.clone());
        tx.settle(LedgerInstruction::PayFee {
            amount: outcome.fee,
            tracking_code: trade.tracking_code.map(str::to_string),
        });
        self.stage_position_modified(tx, account, &outcome.position, trade.size_delta, outcome.fee);
        if let Some(code) = trade.tracking_code {
            tx.emit(EventPayload::Tracking(TrackingEvent {
                tracking_code: code.to_string(),
                market_key: self.state.key.clone(),
                account,
                size_delta: trade.size_delta,
                fee: outcome.fee,
            }));
        }

        info!(
            market = %self.state.key,
            %account,
            size_delta = %trade.size_delta,
            price = %trade.price,
            fee = %outcome.fee,
            size = %outcome.position.size,
            "trade applied"
        );
        Ok(outcome)
    }

    /// Realize pnl and funding into margin at `price` and add `delta`.
    /// withdrawals from an open position must leave it healthy, deposits are always accepted.
    pub(super) fn update_position_margin(
        &self,
        tx: &mut MarketTransaction<'_>,
        params: &MarketParams,
        account: AccountId,
        price: Price,
        delta: Quote,
    ) -> Result<Position, EngineError> {
        let position = tx.position_or_new(account);
        let updated = {
            let calc = tx.calculator(params);
            let current = calc.margin_plus_profit_funding(&position, price);
            let new_margin = Quote::new(checked_add(current.value(), delta.value())?);
            if new_margin.is_negative() {
                return Err(EngineError::InsufficientMargin {
                    margin: new_margin,
                    required: Quote::zero(),
                });
            }

            let updated = Position {
                margin: new_margin,
                last_price: Some(price),
                last_funding_index: tx.latest_funding_index(),
                ..position
            };
            if updated.is_open() && delta.is_negative() {
                if new_margin < params.min_initial_margin {
                    return Err(EngineError::InsufficientMargin {
                        margin: new_margin,
                        required: params.min_initial_margin,
                    });
                }
                if calc.can_liquidate(&updated, price) {
                    return Err(EngineError::CanLiquidate);
                }
                let leverage = calc.leverage(&updated, price);
                if leverage.abs() > params.max_leverage {
                    return Err(EngineError::MaxLeverageExceeded {
                        leverage,
                        max: params.max_leverage,
                    });
                }
            }
            updated
        };

        tx.put_position(account, updated.clone());
        self.stage_position_modified(tx, account, &updated, Decimal::ZERO, Quote::zero());
        Ok(updated)
    }

    /// Add to margin without realizing anything. used for refunds that must never fail.
    pub(super) fn credit_margin(&self, tx: &mut MarketTransaction<'_>, account: AccountId, amount: Quote) -> Position {
        let mut position = tx.position_or_new(account);
        position.margin = position.margin.add(amount);
        tx.put_position(account, position.clone());
        self.stage_position_modified(tx, account, &position, Decimal::ZERO, Quote::zero());
        position
    }

    pub(super) fn stage_position_modified(
        &self,
        tx: &mut MarketTransaction<'_>,
        account: AccountId,
        position: &Position,
        trade_size: Decimal,
        fee: Quote,
    ) {
        tx.emit(EventPayload::PositionModified(PositionModifiedEvent {
            market_key: self.state.key.clone(),
            position_id: position.id,
            account,
            margin: position.margin,
            size: position.size,
            trade_size,
            last_price: position.last_price,
            funding_index: position.last_funding_index,
            fee,
        }));
    }

    /// Move settlement asset into (positive) or out of (negative) the account's margin.
    pub fn transfer_margin(&mut self, account: AccountId, delta: Quote) -> Result<Position, EngineError> {
        let params = self.params()?;
        self.ensure_active()?;
        let (_, price) = self.latest_price()?;

        let mut tx = self.begin();
        if delta.is_zero() {
            return Ok(tx.position_or_new(account));
        }
        self.recompute_funding_in(&mut tx, &params, price);
        let position = self.update_position_margin(&mut tx, &params, account, price, delta)?;
        self.stage_transfer(&mut tx, account, delta);

        let changes = tx.finish();
        self.commit(changes)?;
        info!(market = %self.state.key, %account, %delta, margin = %position.margin, "margin transferred");
        Ok(position)
    }

    /// Withdraw everything the account's margin is worth right now. returns the amount.
    pub fn withdraw_all_margin(&mut self, account: AccountId) -> Result<Quote, EngineError> {
        let params = self.params()?;
        self.ensure_active()?;
        let (_, price) = self.latest_price()?;

        let mut tx = self.begin();
        let Some(position) = tx.position(account) else {
            return Ok(Quote::zero());
        };
        self.recompute_funding_in(&mut tx, &params, price);
        let remaining = tx.calculator(&params).remaining_margin(&position, price);
        if remaining.is_zero() {
            debug!(%account, "nothing to withdraw");
            return Ok(Quote::zero());
        }

        let withdrawal = remaining.negate();
        self.update_position_margin(&mut tx, &params, account, price, withdrawal)?;
        self.stage_transfer(&mut tx, account, withdrawal);

        let changes = tx.finish();
        self.commit(changes)?;
        info!(market = %self.state.key, %account, amount = %remaining, "all margin withdrawn");
        Ok(remaining)
    }

    fn stage_transfer(&self, tx: &mut MarketTransaction<'_>, account: AccountId, delta: Quote) {
        let instruction = if delta.is_negative() {
            LedgerInstruction::Issue {
                account,
                amount: delta.abs(),
            }
        } else {
            LedgerInstruction::Burn { account, amount: delta }
        };
        tx.settle(instruction);
        tx.emit(EventPayload::MarginTransferred(MarginTransferredEvent {
            market_key: self.state.key.clone(),
            account,
            delta,
        }));
    }

    // previews. all of them diff funding against the entry a recomputation would append now.

    pub(super) fn preview<R>(
        &self,
        account: AccountId,
        f: impl FnOnce(&MarginCalculator<'_>, &Position, Price) -> R,
    ) -> Result<Option<R>, EngineError> {
        let Some(position) = self.state.position(account) else {
            return Ok(None);
        };
        let params = self.params()?;
        let (_, price) = self.latest_price()?;
        let current = self.preview_funding(&params, price);
        let calc = MarginCalculator::new(&params, &self.state.funding, current);
        Ok(Some(f(&calc, position, price)))
    }

    pub fn remaining_margin(&self, account: AccountId) -> Result<Quote, EngineError> {
        Ok(self
            .preview(account, |calc, pos, price| calc.remaining_margin(pos, price))?
            .unwrap_or_default())
    }

    pub fn accrued_funding(&self, account: AccountId) -> Result<Quote, EngineError> {
        Ok(self
            .preview(account, |calc, pos, _| calc.accrued_funding(pos))?
            .unwrap_or_default())
    }

    pub fn liquidation_price(&self, account: AccountId) -> Result<Option<Decimal>, EngineError> {
        Ok(self.preview(account, |calc, pos, _| calc.liquidation_price(pos))?.flatten())
    }

    pub fn notional_value(&self, account: AccountId) -> Result<Quote, EngineError> {
        Ok(self
            .preview(account, |_, pos, price| pos.notional_value(price))?
            .unwrap_or_default())
    }

    pub fn margin_snapshot(&self, account: AccountId) -> Result<Option<MarginSnapshot>, EngineError> {
        self.preview(account, |calc, pos, price| calc.snapshot(pos, price))
    }

    /// Fee a trade of `size_delta` would pay at the latest price against the current skew.
    /// with `FeeSchedule::Deferred` this is the commit deposit a submission would take.
    pub fn fee_quote(&self, size_delta: Decimal, schedule: FeeSchedule) -> Result<Quote, EngineError> {
        let params = self.params()?;
        let (_, price) = self.latest_price()?;
        checked_multiply(size_delta.abs(), price.value())?;
        let (maker, taker) = params.fee_rates(schedule);
        Ok(margin::order_fee(size_delta, price, self.state.aggregates.skew, maker, taker))
    }
}

/// Refuses a trade whose sizes or notionals do not fit in a `Decimal` before any fee or
/// margin math runs on it.
fn ensure_representable(
    tx: &MarketTransaction<'_>,
    position: &Position,
    trade: &TradeParams<'_>,
) -> Result<(), EngineError> {
    let price = trade.price.value();
    let new_size = checked_add(position.size.value(), trade.size_delta)?;
    checked_multiply(trade.size_delta.abs(), price)?;
    checked_multiply(new_size.abs(), price)?;

    let aggregates = tx.aggregates();
    let market_size = checked_add(aggregates.size, trade.size_delta.abs())?;
    checked_multiply(market_size, price)?;
    let skew = checked_add(aggregates.skew.value(), trade.size_delta)?;
    checked_multiply(skew.abs(), price)?;
    Ok(())
}

// notional of the side `new_size` sits on, when the trade grows that side past the cap
fn side_over_limit(
    tx: &MarketTransaction<'_>,
    params: &MarketParams,
    old_size: SignedSize,
    new_size: SignedSize,
    price: Price,
) -> Option<Quote> {
    let reducing = old_size.same_side(new_size) && new_size.abs() <= old_size.abs();
    if new_size.is_zero() || reducing {
        return None;
    }
    let mut aggregates = tx.aggregates();
    aggregates.apply_resize(old_size, new_size);
    let side_size = if new_size.is_long() {
        aggregates.long_size()
    } else {
        aggregates.short_size()
    };
    let value = Quote::new(multiply_decimal(side_size, price.value()));
    (value > params.max_market_value).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::super::core::fixtures::*;
    use super::super::results::EngineError;
    use crate::config::{FeeSchedule, MarketParams, ParamKey};
    use crate::events::EventPayload;
    use crate::ledger::SettlementLedger;
    use crate::market::SuspensionReason;
    use crate::order::OrderRequest;
    use crate::types::{AccountId, Quote};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const ALICE: AccountId = AccountId(1);
    const KEEPER: AccountId = AccountId(50);

    fn open_long(h: &mut Harness, size: Decimal, margin: Decimal) {
        h.fund(ALICE.0, margin);
        h.market.transfer_margin(ALICE, Quote::new(margin)).unwrap();
        h.market.submit_order(ALICE, OrderRequest::next_price(size)).unwrap();
        h.push_price(dec!(200));
        h.market.execute_order(KEEPER, ALICE).unwrap();
    }

    #[test]
    fn deposit_burns_ledger_balance() {
        let mut h = harness();
        h.fund(1, dec!(500));
        let pos = h.market.transfer_margin(ALICE, Quote::new(dec!(300))).unwrap();

        assert_eq!(pos.margin.value(), dec!(300));
        assert_eq!(h.ledger.balance(ALICE).value(), dec!(200));
        assert!(h
            .market
            .events()
            .any(|e| matches!(e.payload, EventPayload::MarginTransferred(_))));
    }

    #[test]
    fn deposit_beyond_balance_fails_cleanly() {
        let mut h = harness();
        h.fund(1, dec!(10));
        let err = h.market.transfer_margin(ALICE, Quote::new(dec!(11))).unwrap_err();
        assert!(matches!(err, EngineError::Ledger(_)));
        assert!(h.market.position(ALICE).is_none());
        assert_eq!(h.market.funding_sequence_length(), 1);
        assert_eq!(h.market.events().count(), 0);
    }

    #[test]
    fn withdrawal_from_closed_position() {
        let mut h = harness();
        h.fund(1, dec!(500));
        h.market.transfer_margin(ALICE, Quote::new(dec!(500))).unwrap();
        h.market.transfer_margin(ALICE, Quote::new(dec!(-120))).unwrap();
        assert_eq!(h.market.position(ALICE).unwrap().margin.value(), dec!(380));
        assert_eq!(h.ledger.balance(ALICE).value(), dec!(120));

        let err = h.market.transfer_margin(ALICE, Quote::new(dec!(-381))).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientMargin { .. }));
    }

    #[test]
    fn withdrawal_keeps_open_position_healthy() {
        let mut h = harness();
        open_long(&mut h, dec!(10), dec!(1000));

        // 2000 notional needs 200 margin at 10x
        let err = h.market.transfer_margin(ALICE, Quote::new(dec!(-850))).unwrap_err();
        assert!(matches!(err, EngineError::MaxLeverageExceeded { .. }));

        h.market.transfer_margin(ALICE, Quote::new(dec!(-500))).unwrap();
        let err = h.market.withdraw_all_margin(ALICE).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientMargin { .. }));
    }

    #[test]
    fn withdraw_all_returns_everything() {
        let mut h = harness();
        h.fund(1, dec!(750));
        h.market.transfer_margin(ALICE, Quote::new(dec!(750))).unwrap();

        assert_eq!(h.market.withdraw_all_margin(ALICE).unwrap().value(), dec!(750));
        assert_eq!(h.market.position(ALICE).unwrap().margin, Quote::zero());
        assert_eq!(h.ledger.balance(ALICE).value(), dec!(750));
        assert_eq!(h.market.withdraw_all_margin(AccountId(77)).unwrap(), Quote::zero());
    }

    #[test]
    fn transfers_blocked_while_suspended() {
        let mut h = harness();
        h.fund(1, dec!(10));
        h.market.suspend(AccountId(0), SuspensionReason::Maintenance).unwrap();
        let err = h.market.transfer_margin(ALICE, Quote::new(dec!(5))).unwrap_err();
        assert_eq!(err, EngineError::MarketSuspended);
    }

    #[test]
    fn previews_track_price() {
        let mut h = harness();
        open_long(&mut h, dec!(10), dec!(1000));
        // margin 1000 - keeper deposit 2 - fee 1 (2000 * 0.0005)
        assert_eq!(h.market.remaining_margin(ALICE).unwrap().value(), dec!(997));

        h.push_price(dec!(210));
        assert_eq!(h.market.remaining_margin(ALICE).unwrap().value(), dec!(1097));
        assert_eq!(h.market.notional_value(ALICE).unwrap().value(), dec!(2100));
        assert!(h.market.liquidation_price(ALICE).unwrap().unwrap() < dec!(200));
        let snap = h.market.margin_snapshot(ALICE).unwrap().unwrap();
        assert_eq!(snap.profit_loss.value(), dec!(100));
        assert_eq!(h.market.accrued_funding(ALICE).unwrap(), Quote::zero());

        assert_eq!(h.market.remaining_margin(AccountId(9)).unwrap(), Quote::zero());
        assert_eq!(h.market.liquidation_price(AccountId(9)).unwrap(), None);
    }

    #[test]
    fn fee_quote_per_schedule() {
        let mut h = harness();
        open_long(&mut h, dec!(10), dec!(1000));

        // against a skew of 10: a short of 5 only reduces it
        assert_eq!(h.market.fee_quote(dec!(-5), FeeSchedule::Deferred).unwrap().value(), dec!(0.2));
        assert_eq!(h.market.fee_quote(dec!(-5), FeeSchedule::Immediate).unwrap().value(), dec!(2));
        assert_eq!(h.market.fee_quote(dec!(20), FeeSchedule::Immediate).unwrap().value(), dec!(14));

        let bob = AccountId(3);
        h.fund(bob.0, dec!(500));
        h.market.transfer_margin(bob, Quote::new(dec!(500))).unwrap();
        let submitted = h.market.submit_order(bob, OrderRequest::next_price(dec!(-5))).unwrap();
        assert_eq!(submitted.order.commit_deposit.value(), dec!(0.2));

        assert!(h.market.fee_quote(Decimal::MAX, FeeSchedule::Immediate).is_err());
    }

    #[test]
    fn market_value_cap_per_side() {
        let mut h = harness_with(MarketParams {
            max_market_value: Quote::new(dec!(3000)),
            max_funding_velocity: Decimal::ZERO,
            ..MarketParams::default()
        });
        open_long(&mut h, dec!(10), dec!(1000));

        // another 10 long would put 4000 on the long side
        let bob = AccountId(2);
        h.fund(2, dec!(1000));
        h.market.transfer_margin(bob, Quote::new(dec!(1000))).unwrap();
        let err = h.market.submit_order(bob, OrderRequest::next_price(dec!(10))).unwrap_err();
        assert!(matches!(err, EngineError::MaxMarketSizeExceeded { .. }));

        // shorts are on the other side
        h.market.submit_order(bob, OrderRequest::next_price(dec!(-10))).unwrap();
        h.settings.set(&key(), ParamKey::MaxMarketValue, dec!(1));
        // reducing is always allowed
        h.market.cancel_order(bob, bob).unwrap();
        h.market.submit_order(ALICE, OrderRequest::next_price(dec!(-5))).unwrap();
    }
}
