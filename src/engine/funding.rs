//! Funding recomputation.

use super::core::Market;
use super::results::{EngineError, FundingResult};
use super::transaction::MarketTransaction;
use crate::config::MarketParams;
use crate::events::{EventPayload, FundingRecomputedEvent};
use crate::funding::{self, FundingState};
use crate::types::Price;
use rust_decimal::Decimal;
use tracing::debug;

impl Market {
    /// Stage the funding accrued since the last recomputation. runs before any position is touched.
    pub(super) fn recompute_funding_in(
        &self,
        tx: &mut MarketTransaction<'_>,
        params: &MarketParams,
        price: Price,
    ) -> usize {
        if tx.funding_recomputed() {
            return tx.latest_funding_index();
        }
        let now = self.current_time;
        let skew = tx.skew();
        let state = tx.funding_state().clone();

        let rate = funding::current_funding_rate(&state, skew, now, params);
        let entry = tx.latest_funding() + funding::unrecorded_funding(&state, skew, price, now, params);
        let index = tx.record_funding(
            entry,
            FundingState {
                last_recomputed: now,
                rate_last_recomputed: rate,
            },
        );

        debug!(market = %self.state.key, index, %entry, %rate, "funding recomputed");
        tx.emit(EventPayload::FundingRecomputed(FundingRecomputedEvent {
            market_key: self.state.key.clone(),
            funding: entry,
            funding_rate: rate,
            index,
            timestamp: now,
        }));
        index
    }

    /// Recompute and record funding at the latest price.
    pub fn recompute_funding(&mut self) -> Result<FundingResult, EngineError> {
        let params = self.params()?;
        let (_, price) = self.latest_price()?;

        let mut tx = self.begin();
        let index = self.recompute_funding_in(&mut tx, &params, price);
        let result = FundingResult {
            index,
            funding: tx.latest_funding(),
            funding_rate: tx.funding_state().rate_last_recomputed,
            timestamp: self.current_time,
        };
        let changes = tx.finish();
        self.commit(changes)?;
        Ok(result)
    }

    /// Daily funding rate right now, including the drift since the last recomputation.
    pub fn current_funding_rate(&self) -> Result<Decimal, EngineError> {
        let params = self.params()?;
        Ok(funding::current_funding_rate(
            &self.state.funding_state,
            self.state.aggregates.skew,
            self.current_time,
            &params,
        ))
    }

    pub fn funding_sequence_length(&self) -> usize {
        self.state.funding.len()
    }

    pub fn funding_since(&self, index: usize) -> Decimal {
        self.state.funding.funding_since(index)
    }

    /// Per-unit funding accrued since the last recomputation and not recorded yet.
    pub fn unrecorded_funding(&self) -> Result<Decimal, EngineError> {
        let params = self.params()?;
        let (_, price) = self.latest_price()?;
        Ok(funding::unrecorded_funding(
            &self.state.funding_state,
            self.state.aggregates.skew,
            price,
            self.current_time,
            &params,
        ))
    }

    /// The cumulative entry a recomputation right now would append. previews diff against this.
    pub(super) fn preview_funding(&self, params: &MarketParams, price: Price) -> Decimal {
        funding::next_funding_entry(
            &self.state.funding,
            &self.state.funding_state,
            self.state.aggregates.skew,
            price,
            self.current_time,
            params,
        )
    }
}
