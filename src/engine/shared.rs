//! A market shared between threads: one writer at a time, any number of readers.

use super::core::Market;
use super::results::{CancelResult, EngineError, ExecutionResult, FundingResult, LiquidationResult, SubmitResult};
use crate::order::OrderRequest;
use crate::position::Position;
use crate::types::{AccountId, Quote};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
pub struct SharedMarket {
    inner: Arc<RwLock<Market>>,
}

impl SharedMarket {
    pub fn new(market: Market) -> Self {
        Self {
            inner: Arc::new(RwLock::new(market)),
        }
    }

    /// Run `f` against a consistent snapshot of the market.
    pub fn read<R>(&self, f: impl FnOnce(&Market) -> R) -> R {
        f(&self.read_guard())
    }

    /// Run `f` with exclusive access. operations inside are still all-or-nothing on their own.
    pub fn write<R>(&self, f: impl FnOnce(&mut Market) -> R) -> R {
        f(&mut self.write_guard())
    }

    // a panicked writer never leaves a half-applied transaction behind, so the lock stays usable
    fn read_guard(&self) -> RwLockReadGuard<'_, Market> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Market> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn submit_order(&self, account: AccountId, request: OrderRequest) -> Result<SubmitResult, EngineError> {
        self.write(|m| m.submit_order(account, request))
    }

    pub fn cancel_order(&self, caller: AccountId, account: AccountId) -> Result<CancelResult, EngineError> {
        self.write(|m| m.cancel_order(caller, account))
    }

    pub fn execute_order(&self, caller: AccountId, account: AccountId) -> Result<ExecutionResult, EngineError> {
        self.write(|m| m.execute_order(caller, account))
    }

    pub fn transfer_margin(&self, account: AccountId, delta: Quote) -> Result<Position, EngineError> {
        self.write(|m| m.transfer_margin(account, delta))
    }

    pub fn liquidate(&self, liquidator: AccountId, account: AccountId) -> Result<LiquidationResult, EngineError> {
        self.write(|m| m.liquidate(liquidator, account))
    }

    pub fn recompute_funding(&self) -> Result<FundingResult, EngineError> {
        self.write(|m| m.recompute_funding())
    }

    pub fn position(&self, account: AccountId) -> Option<Position> {
        self.read(|m| m.position(account).cloned())
    }

    pub fn advance_secs(&self, secs: u64) {
        self.write(|m| m.advance_secs(secs));
    }
}
