//! Liquidation: previews and forced closure.

use super::core::Market;
use super::results::{EngineError, LiquidationResult};
use crate::events::{EventPayload, LiquidatedEvent, RemovalReason};
use crate::ledger::LedgerInstruction;
use crate::liquidation::{self, LiquidationStatus};
use crate::margin::MarginCalculator;
use crate::position::Position;
use crate::types::{AccountId, Quote};
use tracing::{info, warn};

impl Market {
    pub fn can_liquidate(&self, account: AccountId) -> Result<bool, EngineError> {
        Ok(self
            .preview(account, |calc, pos, price| calc.can_liquidate(pos, price))?
            .unwrap_or(false))
    }

    /// How close the account's position is to liquidation. `None` without an open position.
    pub fn liquidation_status(&self, account: AccountId) -> Result<Option<LiquidationStatus>, EngineError> {
        let params = self.params()?;
        Ok(self
            .preview(account, |calc, pos, price| {
                liquidation::liquidation_status(calc, pos, price, &params)
            })?
            .flatten())
    }

    /// Every account a keeper could liquidate right now, in account order.
    pub fn liquidatable_accounts(&self) -> Result<Vec<AccountId>, EngineError> {
        let params = self.params()?;
        let (_, price) = self.latest_price()?;
        let current = self.preview_funding(&params, price);
        let calc = MarginCalculator::new(&params, &self.state.funding, current);

        let mut accounts: Vec<AccountId> = self
            .state
            .open_positions()
            .filter(|(_, position)| calc.can_liquidate(position, price))
            .map(|(account, _)| *account)
            .collect();
        accounts.sort();
        Ok(accounts)
    }

    /// Close an undercollateralized position at the latest price and pay the liquidator.
    ///
    /// Works on suspended markets. The liquidation fee is issued to the
    /// liquidator and whatever margin is left stays with the market; a pending
    /// order on the account is dropped and its deposits go to the fee sink.
    pub fn liquidate(&mut self, liquidator: AccountId, account: AccountId) -> Result<LiquidationResult, EngineError> {
        let params = self.params()?;
        let (round_id, price) = self.latest_price()?;

        let mut tx = self.begin();
        let index = self.recompute_funding_in(&mut tx, &params, price);
        let position = tx
            .position(account)
            .filter(Position::is_open)
            .ok_or(EngineError::CannotLiquidate(account))?;
        let assessment = liquidation::assess_liquidation(&tx.calculator(&params), &position, price, &params)
            .ok_or(EngineError::CannotLiquidate(account))?;

        let closed = position.zeroed(index);
        tx.put_position(account, closed.clone());
        tx.settle(LedgerInstruction::Issue {
            account: liquidator,
            amount: assessment.fee,
        });

        let forfeited_deposits = match tx.remove_order(account) {
            Some(order) => {
                tx.settle(LedgerInstruction::PayFee {
                    amount: order.total_deposit(),
                    tracking_code: order.tracking_code.clone(),
                });
                self.stage_order_removed(&mut tx, account, &order, round_id, RemovalReason::Liquidated);
                order.total_deposit()
            }
            None => Quote::zero(),
        };

        self.stage_position_modified(&mut tx, account, &closed, -position.size.value(), assessment.fee);
        tx.emit(EventPayload::Liquidated(LiquidatedEvent {
            market_key: self.state.key.clone(),
            position_id: position.id,
            account,
            liquidator,
            size: position.size,
            price,
            fee: assessment.fee,
            market_absorbed: assessment.market_absorbed,
        }));

        let changes = tx.finish();
        self.commit(changes)?;
        if assessment.market_absorbed.is_negative() {
            warn!(market = %self.state.key, %account, deficit = %assessment.market_absorbed.abs(), "liquidated underwater position");
        }
        info!(
            market = %self.state.key,
            %account,
            %liquidator,
            size = %position.size,
            %price,
            fee = %assessment.fee,
            "position liquidated"
        );

        Ok(LiquidationResult {
            account,
            liquidator,
            position_id: position.id,
            size: position.size,
            price,
            fee: assessment.fee,
            market_absorbed: assessment.market_absorbed,
            forfeited_deposits,
        })
    }
}
