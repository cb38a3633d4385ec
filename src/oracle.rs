// 9.0: price oracle adapter.
//
// The engine only ever asks three things of an oracle: which round is current, what the
// price was at a given round, and what the latest price is. Each answer carries a validity
// flag (stale feed, circuit breaker, frozen aggregator) and the engine refuses to act on an
// invalid price instead of waiting for a better one.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{Price, RoundId, Timestamp};

/// One oracle observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OraclePrice {
    pub round_id: RoundId,
    pub price: Decimal,
    pub updated_at: Timestamp,
    /// Set when the adapter considers this observation stale or otherwise unusable.
    pub invalid: bool,
}

impl OraclePrice {
    /// The price as an engine `Price`, or an error if the adapter flagged it.
    pub fn usable(&self, asset: &str) -> Result<Price, OracleError> {
        if self.invalid {
            return Err(OracleError::InvalidPrice {
                asset: asset.to_string(),
                round_id: self.round_id,
            });
        }
        Price::new(self.price).ok_or(OracleError::InvalidPrice {
            asset: asset.to_string(),
            round_id: self.round_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("no price feed for {0}")]
    UnknownAsset(String),

    #[error("no price for {asset} at {round_id}")]
    UnknownRound { asset: String, round_id: RoundId },

    #[error("invalid or stale price for {asset} at {round_id}")]
    InvalidPrice { asset: String, round_id: RoundId },
}

/// Trait for oracle adapters. Implement this to integrate with a specific aggregator.
pub trait PriceOracle: Send + Sync {
    fn current_round_id(&self, asset: &str) -> Result<RoundId, OracleError>;

    fn price_at_round(&self, asset: &str, round_id: RoundId) -> Result<OraclePrice, OracleError>;

    fn latest_price(&self, asset: &str) -> Result<OraclePrice, OracleError> {
        let round = self.current_round_id(asset)?;
        self.price_at_round(asset, round)
    }
}

#[derive(Debug, Default)]
struct Feed {
    rounds: Vec<OraclePrice>,
    invalid: bool,
}

/// Round-keeping oracle held in memory. Round ids start at 1 and increase by one per push.
#[derive(Debug, Default)]
pub struct InMemoryOracle {
    feeds: RwLock<HashMap<String, Feed>>,
}

impl InMemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new round and return its id.
    pub fn push_price(&self, asset: &str, price: Decimal, at: Timestamp) -> RoundId {
        let mut feeds = match self.feeds.write() {
            Ok(feeds) => feeds,
            Err(poisoned) => poisoned.into_inner(),
        };
        let feed = feeds.entry(asset.to_string()).or_default();
        let round_id = RoundId(feed.rounds.len() as u64 + 1);
        feed.rounds.push(OraclePrice {
            round_id,
            price,
            updated_at: at,
            invalid: false,
        });
        round_id
    }

    /// Flag every read for `asset` as invalid (stale feed, breaker tripped) until cleared.
    pub fn set_invalid(&self, asset: &str, invalid: bool) {
        let mut feeds = match self.feeds.write() {
            Ok(feeds) => feeds,
            Err(poisoned) => poisoned.into_inner(),
        };
        feeds.entry(asset.to_string()).or_default().invalid = invalid;
    }

    pub fn round_count(&self, asset: &str) -> usize {
        self.feeds
            .read()
            .ok()
            .and_then(|feeds| feeds.get(asset).map(|f| f.rounds.len()))
            .unwrap_or(0)
    }
}

impl PriceOracle for InMemoryOracle {
    fn current_round_id(&self, asset: &str) -> Result<RoundId, OracleError> {
        let feeds = self
            .feeds
            .read()
            .map_err(|_| OracleError::UnknownAsset(asset.to_string()))?;
        let feed = feeds
            .get(asset)
            .ok_or_else(|| OracleError::UnknownAsset(asset.to_string()))?;
        Ok(RoundId(feed.rounds.len() as u64))
    }

    fn price_at_round(&self, asset: &str, round_id: RoundId) -> Result<OraclePrice, OracleError> {
        let feeds = self
            .feeds
            .read()
            .map_err(|_| OracleError::UnknownAsset(asset.to_string()))?;
        let feed = feeds
            .get(asset)
            .ok_or_else(|| OracleError::UnknownAsset(asset.to_string()))?;

        let index = round_id.0.checked_sub(1).ok_or(OracleError::UnknownRound {
            asset: asset.to_string(),
            round_id,
        })?;
        let mut observation = feed
            .rounds
            .get(index as usize)
            .copied()
            .ok_or(OracleError::UnknownRound {
                asset: asset.to_string(),
                round_id,
            })?;
        observation.invalid |= feed.invalid;
        Ok(observation)
    }
}
