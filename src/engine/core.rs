// 8.0 engine/core.rs: one market. owns the market state and the event log, holds the injected
// oracle, settings store and ledger. every mutating operation runs as
// params snapshot -> oracle reads -> MarketTransaction -> commit.

use super::config::EngineConfig;
use super::results::EngineError;
use super::transaction::{MarketTransaction, StagedChanges};
use crate::config::{MarketParams, SettingsStore};
use crate::events::{Event, EventLog, EventPayload};
use crate::ledger::SettlementLedger;
use crate::market::{MarketState, MarketStatus, SuspensionReason};
use crate::oracle::PriceOracle;
use crate::order::DelayedOrder;
use crate::position::Position;
use crate::types::{AccountId, MarketKey, Price, RoundId, SignedSize, Timestamp};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/** 8.1: market engine. all state for one market lives here */
pub struct Market {
    pub(super) config: EngineConfig,
    pub(super) state: MarketState,
    pub(super) oracle: Arc<dyn PriceOracle>,
    pub(super) settings: Arc<dyn SettingsStore>,
    pub(super) ledger: Arc<dyn SettlementLedger>,
    pub(super) events: EventLog,
    pub(super) current_time: Timestamp,
}

impl fmt::Debug for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Market")
            .field("key", &self.state.key)
            .field("asset", &self.state.asset)
            .field("status", &self.state.status)
            .field("positions", &self.state.positions.len())
            .field("orders", &self.state.orders.len())
            .field("current_time", &self.current_time)
            .finish()
    }
}

impl Market {
    /// Fails if the settings store holds an invalid configuration for `key`.
    /// The clock starts at the oracle's latest observation for `asset`, or at zero without one.
    pub fn new(
        key: MarketKey,
        asset: impl Into<String>,
        oracle: Arc<dyn PriceOracle>,
        settings: Arc<dyn SettingsStore>,
        ledger: Arc<dyn SettlementLedger>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        MarketParams::load(settings.as_ref(), &key)?;
        let asset = asset.into();
        let current_time = oracle
            .latest_price(&asset)
            .map_or(Timestamp::from_millis(0), |observed| observed.updated_at);
        let events = EventLog::new(config.max_events);
        Ok(Self {
            config,
            state: MarketState::new(key, asset, current_time),
            oracle,
            settings,
            ledger,
            events,
            current_time,
        })
    }

    // clock

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    pub fn advance_secs(&mut self, secs: u64) {
        self.current_time = self.current_time.plus_secs(secs);
    }

    // status

    pub fn key(&self) -> &MarketKey {
        &self.state.key
    }

    pub fn asset(&self) -> &str {
        &self.state.asset
    }

    pub fn status(&self) -> MarketStatus {
        self.state.status
    }

    pub fn suspend(&mut self, caller: AccountId, reason: SuspensionReason) -> Result<(), EngineError> {
        self.ensure_operator(caller)?;
        warn!(market = %self.state.key, ?reason, "market suspended");
        self.state.status = MarketStatus::Suspended(reason);
        Ok(())
    }

    pub fn resume(&mut self, caller: AccountId) -> Result<(), EngineError> {
        self.ensure_operator(caller)?;
        info!(market = %self.state.key, "market resumed");
        self.state.status = MarketStatus::Active;
        Ok(())
    }

    fn ensure_operator(&self, caller: AccountId) -> Result<(), EngineError> {
        match self.config.operator {
            Some(operator) if operator != caller => Err(EngineError::Unauthorized(caller)),
            _ => Ok(()),
        }
    }

    // queries

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    pub fn position(&self, account: AccountId) -> Option<&Position> {
        self.state.position(account)
    }

    pub fn order(&self, account: AccountId) -> Option<&DelayedOrder> {
        self.state.order(account)
    }

    pub fn market_size(&self) -> Decimal {
        self.state.aggregates.size
    }

    pub fn market_skew(&self) -> SignedSize {
        self.state.aggregates.skew
    }

    /// (long, short) open interest in base units.
    pub fn market_sizes(&self) -> (Decimal, Decimal) {
        (self.state.aggregates.long_size(), self.state.aggregates.short_size())
    }

    pub fn params(&self) -> Result<MarketParams, EngineError> {
        Ok(MarketParams::load(self.settings.as_ref(), &self.state.key)?)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn recent_events(&self, count: usize) -> Vec<&Event> {
        self.events.recent(count)
    }

    pub fn events_for(&self, account: AccountId) -> Vec<&Event> {
        self.events.for_account(account)
    }

    // oracle access

    pub(super) fn ensure_active(&self) -> Result<(), EngineError> {
        if self.state.status.is_suspended() {
            return Err(EngineError::MarketSuspended);
        }
        Ok(())
    }

    pub(super) fn current_round(&self) -> Result<RoundId, EngineError> {
        Ok(self.oracle.current_round_id(&self.state.asset)?)
    }

    /// Latest usable price and the round it came from.
    pub(super) fn latest_price(&self) -> Result<(RoundId, Price), EngineError> {
        let observation = self.oracle.latest_price(&self.state.asset)?;
        let price = observation.usable(&self.state.asset)?;
        Ok((observation.round_id, price))
    }

    pub(super) fn price_at(&self, round_id: RoundId) -> Result<Price, EngineError> {
        let observation = self.oracle.price_at_round(&self.state.asset, round_id)?;
        Ok(observation.usable(&self.state.asset)?)
    }

    /// Latest price, refused when it moved more than `max_price_divergence` since the round before.
    pub(super) fn checked_latest_price(&self, params: &MarketParams) -> Result<(RoundId, Price), EngineError> {
        let (round_id, price) = self.latest_price()?;
        let previous = round_id
            .previous()
            .filter(|r| r.0 > 0)
            .and_then(|r| self.price_at(r).ok());
        if let Some(previous) = previous {
            let deviation = price.deviation_from(previous);
            if deviation > params.max_price_divergence {
                return Err(EngineError::PriceTooVolatile {
                    deviation,
                    max: params.max_price_divergence,
                });
            }
        }
        Ok((round_id, price))
    }

    // commit

    pub(super) fn begin(&self) -> MarketTransaction<'_> {
        MarketTransaction::begin(&self.state)
    }

    /// Settle the staged ledger batch, then apply the staged state and record its events.
    /// a ledger failure leaves the market exactly as it was.
    pub(super) fn commit(&mut self, changes: StagedChanges) -> Result<(), EngineError> {
        if changes.is_empty() {
            return Ok(());
        }
        if !changes.ledger.is_empty() {
            self.ledger.settle(&changes.ledger)?;
        }
        let events = changes.apply_to(&mut self.state);
        for payload in events {
            self.emit_event(payload);
        }
        debug_assert!(self.state.aggregates.is_consistent());
        Ok(())
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = self.events.record(self.current_time, payload);
        if self.config.verbose {
            info!(id = event.id.0, event = event.payload.name(), payload = ?event.payload, "event");
        } else {
            debug!(id = event.id.0, event = event.payload.name(), "event");
        }
    }
}
