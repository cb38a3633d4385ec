//! Deferred order management: submit, cancel, execute.

use super::core::Market;
use super::positions::TradeParams;
use super::results::{CancelResult, EngineError, ExecutionResult, SubmitResult};
use super::transaction::MarketTransaction;
use crate::config::FeeSchedule;
use crate::events::{EventPayload, OrderRemovedEvent, OrderSubmittedEvent, RemovalReason};
use crate::ledger::LedgerInstruction;
use crate::order::{self, DelayedOrder, FillPriceSource, OrderKind, OrderRequest};
use crate::types::{AccountId, Quote, RoundId};
use tracing::{debug, info};

impl Market {
    /// Commit to a trade at a price that does not exist yet.
    ///
    /// The trade is validated at the current price with the deferred fee rates,
    /// then the commit deposit (that fee) and the keeper deposit are taken from
    /// margin. The order targets the next oracle round.
    pub fn submit_order(&mut self, account: AccountId, request: OrderRequest) -> Result<SubmitResult, EngineError> {
        let params = self.params()?;
        if request.size_delta.is_zero() {
            return Err(EngineError::ZeroSizeOrder);
        }
        self.ensure_active()?;
        if self.state.order(account).is_some() {
            return Err(EngineError::OrderAlreadyExists(account));
        }

        let delay = match request.kind {
            OrderKind::Delayed => {
                let delay = request.desired_delay.unwrap_or(params.min_delay);
                if delay < params.min_delay || delay > params.max_delay {
                    return Err(EngineError::DelayOutOfBounds {
                        delay,
                        min: params.min_delay,
                        max: params.max_delay,
                    });
                }
                Some(delay)
            }
            OrderKind::NextPrice => None,
        };

        let (round_id, price) = self.checked_latest_price(&params)?;
        let now = self.current_time;

        let mut tx = self.begin();
        self.recompute_funding_in(&mut tx, &params, price);

        let position = tx.position_or_new(account);
        let (maker_fee, taker_fee) = params.fee_rates(FeeSchedule::Deferred);
        let trade = TradeParams {
            size_delta: request.size_delta,
            price,
            maker_fee,
            taker_fee,
            tracking_code: request.tracking_code.as_deref(),
        };
        let simulated = self.post_trade_details(&tx, &params, &position, &trade)?;

        let commit_deposit = simulated.fee;
        let keeper_deposit = params.min_keeper_fee;
        let updated = self.update_position_margin(
            &mut tx,
            &params,
            account,
            price,
            commit_deposit.add(keeper_deposit).negate(),
        )?;

        let order = DelayedOrder {
            kind: request.kind,
            size_delta: request.size_delta,
            price_bound: request
                .price_impact_delta
                .and_then(|delta| order::price_bound(request.size_delta, price, delta)),
            target_round_id: round_id.next(),
            commit_deposit,
            keeper_deposit,
            executable_at: delay.map_or(now, |d| now.plus_secs(d)),
            intention_time: now,
            tracking_code: request.tracking_code.clone(),
        };
        tx.put_order(account, order.clone());
        tx.emit(EventPayload::OrderSubmitted(OrderSubmittedEvent {
            market_key: self.state.key.clone(),
            account,
            kind: order.kind,
            size_delta: order.size_delta,
            target_round_id: order.target_round_id,
            intention_time: order.intention_time,
            executable_at: order.executable_at,
            commit_deposit,
            keeper_deposit,
            tracking_code: order.tracking_code.clone(),
        }));

        let changes = tx.finish();
        self.commit(changes)?;
        info!(
            market = %self.state.key,
            %account,
            kind = ?order.kind,
            size_delta = %order.size_delta,
            target_round = order.target_round_id.0,
            %commit_deposit,
            "order submitted"
        );

        Ok(SubmitResult {
            account,
            order,
            margin_after: updated.margin,
        })
    }

    /// Remove a pending order. the owner may cancel at any time, anyone else only once it is too old.
    ///
    /// The commit deposit goes to the fee sink either way. The keeper deposit goes
    /// back into the owner's margin, or to the keeper who cleaned the order up.
    /// Nothing is re-validated, so this works on suspended markets and on
    /// positions that are close to liquidation.
    pub fn cancel_order(&mut self, caller: AccountId, account: AccountId) -> Result<CancelResult, EngineError> {
        let params = self.params()?;
        let Some(order) = self.state.order(account).cloned() else {
            return Err(EngineError::NoOrderExists(account));
        };
        let by_keeper = caller != account;

        let current_round = if by_keeper {
            let current_round = self.current_round()?;
            if !order.is_expired(current_round, self.current_time, &params) {
                return Err(EngineError::KeeperCannotCancelYet(account));
            }
            current_round
        } else {
            // the owner does not need the oracle to cancel
            self.current_round().unwrap_or(order.target_round_id)
        };

        let mut tx = self.begin();
        tx.remove_order(account);
        tx.settle(LedgerInstruction::PayFee {
            amount: order.commit_deposit,
            tracking_code: order.tracking_code.clone(),
        });
        let (refunded_to_margin, keeper_reward, reason) = if by_keeper {
            tx.settle(LedgerInstruction::Issue {
                account: caller,
                amount: order.keeper_deposit,
            });
            (Quote::zero(), Some(order.keeper_deposit), RemovalReason::CancelledByKeeper)
        } else {
            self.credit_margin(&mut tx, account, order.keeper_deposit);
            (order.keeper_deposit, None, RemovalReason::CancelledByOwner)
        };
        self.stage_order_removed(&mut tx, account, &order, current_round, reason);

        let changes = tx.finish();
        self.commit(changes)?;
        info!(market = %self.state.key, %account, %caller, ?reason, "order cancelled");

        Ok(CancelResult {
            account,
            by_keeper,
            forfeited: order.commit_deposit,
            refunded_to_margin,
            keeper_reward,
        })
    }

    /// Fill a pending order once its price exists.
    ///
    /// Both deposits are refunded into margin when the owner executes; a keeper
    /// gets the keeper deposit instead. The trade is then applied at the fill
    /// price with the deferred fee rates and must pass every margin check there,
    /// otherwise nothing happens.
    pub fn execute_order(&mut self, caller: AccountId, account: AccountId) -> Result<ExecutionResult, EngineError> {
        let params = self.params()?;
        let Some(order) = self.state.order(account).cloned() else {
            return Err(EngineError::NoOrderExists(account));
        };
        self.ensure_active()?;

        let current_round = self.current_round()?;
        let now = self.current_time;
        if order.is_expired(current_round, now, &params) {
            return Err(EngineError::OrderTooOld(account));
        }
        if !order.is_executable(current_round, now) {
            return Err(EngineError::OrderNotExecutable(account));
        }

        let source = order.fill_price_source(current_round, &params);
        let fill_price = match source {
            FillPriceSource::TargetRound(round_id) => self.price_at(round_id)?,
            FillPriceSource::Latest => self.checked_latest_price(&params)?.1,
        };
        if let Some(bound) = order.price_bound {
            if !order.accepts_fill(fill_price) {
                return Err(EngineError::PriceImpactToleranceExceeded { fill: fill_price, bound });
            }
        }
        debug!(%account, fill = %fill_price, ?source, "fill price resolved");
        let (_, current_price) = self.latest_price()?;

        let by_keeper = caller != account;
        let mut tx = self.begin();
        self.recompute_funding_in(&mut tx, &params, current_price);
        tx.remove_order(account);

        let keeper_reward = if by_keeper {
            self.update_position_margin(&mut tx, &params, account, fill_price, order.commit_deposit)?;
            tx.settle(LedgerInstruction::Issue {
                account: caller,
                amount: order.keeper_deposit,
            });
            Some(order.keeper_deposit)
        } else {
            self.update_position_margin(&mut tx, &params, account, fill_price, order.total_deposit())?;
            None
        };

        let (maker_fee, taker_fee) = params.fee_rates(FeeSchedule::Deferred);
        let outcome = self.apply_trade(
            &mut tx,
            &params,
            account,
            TradeParams {
                size_delta: order.size_delta,
                price: fill_price,
                maker_fee,
                taker_fee,
                tracking_code: order.tracking_code.as_deref(),
            },
        )?;
        self.stage_order_removed(&mut tx, account, &order, current_round, RemovalReason::Executed);

        let changes = tx.finish();
        self.commit(changes)?;
        info!(market = %self.state.key, %account, %caller, fill = %fill_price, "order executed");

        Ok(ExecutionResult {
            account,
            fill_price,
            size_delta: order.size_delta,
            fee: outcome.fee,
            position: outcome.position,
            keeper_reward,
        })
    }

    pub(super) fn stage_order_removed(
        &self,
        tx: &mut MarketTransaction<'_>,
        account: AccountId,
        order: &DelayedOrder,
        current_round: RoundId,
        reason: RemovalReason,
    ) {
        tx.emit(EventPayload::OrderRemoved(OrderRemovedEvent {
            market_key: self.state.key.clone(),
            account,
            kind: order.kind,
            size_delta: order.size_delta,
            target_round_id: order.target_round_id,
            current_round_id: current_round,
            commit_deposit: order.commit_deposit,
            keeper_deposit: order.keeper_deposit,
            reason,
        }));
    }
}
