// 11.0: every committed state change produces an event. used for audit trails, keeper bots
// and fee attribution. the EventPayload enum lists all event types.
// events are staged with the rest of an operation and only reach the log on commit,
// so a failed operation never leaves an event behind.

use crate::order::OrderKind;
use crate::types::{AccountId, MarketKey, PositionId, Price, Quote, RoundId, SignedSize, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // order lifecycle
    OrderSubmitted(OrderSubmittedEvent),
    OrderRemoved(OrderRemovedEvent),

    // position events
    PositionModified(PositionModifiedEvent),
    Liquidated(LiquidatedEvent),
    MarginTransferred(MarginTransferredEvent),

    // fee attribution
    Tracking(TrackingEvent),

    // market data
    FundingRecomputed(FundingRecomputedEvent),
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::OrderSubmitted(_) => "order_submitted",
            EventPayload::OrderRemoved(_) => "order_removed",
            EventPayload::PositionModified(_) => "position_modified",
            EventPayload::Liquidated(_) => "liquidated",
            EventPayload::MarginTransferred(_) => "margin_transferred",
            EventPayload::Tracking(_) => "tracking",
            EventPayload::FundingRecomputed(_) => "funding_recomputed",
        }
    }

    /// The account the event is about, if any.
    pub fn account(&self) -> Option<AccountId> {
        match self {
            EventPayload::OrderSubmitted(e) => Some(e.account),
            EventPayload::OrderRemoved(e) => Some(e.account),
            EventPayload::PositionModified(e) => Some(e.account),
            EventPayload::Liquidated(e) => Some(e.account),
            EventPayload::MarginTransferred(e) => Some(e.account),
            EventPayload::Tracking(e) => Some(e.account),
            EventPayload::FundingRecomputed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmittedEvent {
    pub market_key: MarketKey,
    pub account: AccountId,
    pub kind: OrderKind,
    pub size_delta: Decimal,
    pub target_round_id: RoundId,
    pub intention_time: Timestamp,
    pub executable_at: Timestamp,
    pub commit_deposit: Quote,
    pub keeper_deposit: Quote,
    pub tracking_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRemovedEvent {
    pub market_key: MarketKey,
    pub account: AccountId,
    pub kind: OrderKind,
    pub size_delta: Decimal,
    pub target_round_id: RoundId,
    pub current_round_id: RoundId,
    pub commit_deposit: Quote,
    pub keeper_deposit: Quote,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Executed,
    CancelledByOwner,
    CancelledByKeeper,
    Liquidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionModifiedEvent {
    pub market_key: MarketKey,
    pub position_id: PositionId,
    pub account: AccountId,
    pub margin: Quote,
    pub size: SignedSize,
    // zero for pure margin changes
    pub trade_size: Decimal,
    pub last_price: Option<Price>,
    pub funding_index: usize,
    pub fee: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidatedEvent {
    pub market_key: MarketKey,
    pub position_id: PositionId,
    pub account: AccountId,
    pub liquidator: AccountId,
    pub size: SignedSize,
    pub price: Price,
    pub fee: Quote,
    // margin left after the fee, kept by the market. negative when the position was underwater.
    pub market_absorbed: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginTransferredEvent {
    pub market_key: MarketKey,
    pub account: AccountId,
    pub delta: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub tracking_code: String,
    pub market_key: MarketKey,
    pub account: AccountId,
    pub size_delta: Decimal,
    pub fee: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRecomputedEvent {
    pub market_key: MarketKey,
    pub funding: Decimal,
    pub funding_rate: Decimal,
    pub index: usize,
    pub timestamp: Timestamp,
}

/// Bounded, id-stamped event history. oldest events fall off once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            capacity,
        }
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> &Event {
        let event = Event::new(EventId(self.next_id), timestamp, payload);
        self.next_id += 1;
        if self.capacity > 0 && self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        &self.events[self.events.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn recent(&self, count: usize) -> Vec<&Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.range(start..).collect()
    }

    pub fn for_account(&self, account: AccountId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.payload.account() == Some(account))
            .collect()
    }

    /// Id the next recorded event will get. also the total ever recorded, plus one.
    pub fn next_id(&self) -> EventId {
        EventId(self.next_id)
    }
}
