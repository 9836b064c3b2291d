// 11.0: every ledger mutation appends an event. the log is append only and never trimmed:
// the keeper has no other way to learn which accounts hold a position.

use crate::types::{AccountId, Amount, Leverage, Price, Side, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    // strictly increasing from 1, no gaps
    pub seq: u64,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    PositionOpened(PositionOpenedEvent),
    PositionClosed(PositionClosedEvent),
    Liquidated(LiquidatedEvent),
    StopsUpdated(StopsUpdatedEvent),
    StopClosed(StopClosedEvent),
}

impl EventPayload {
    pub fn account_id(&self) -> AccountId {
        match self {
            EventPayload::PositionOpened(e) => e.account_id,
            EventPayload::PositionClosed(e) => e.account_id,
            EventPayload::Liquidated(e) => e.account_id,
            EventPayload::StopsUpdated(e) => e.account_id,
            EventPayload::StopClosed(e) => e.account_id,
        }
    }

    // true when the account has a live position after this event
    pub fn leaves_position_open(&self) -> bool {
        matches!(
            self,
            EventPayload::PositionOpened(_) | EventPayload::StopsUpdated(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub account_id: AccountId,
    pub side: Side,
    pub leverage: Leverage,
    pub deposit: Amount,
    pub fee: Amount,
    pub margin: Amount,
    pub entry_price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub account_id: AccountId,
    pub exit_price: Price,
    pub pnl: Amount,
    pub close_fee: Amount,
    pub settlement: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidatedEvent {
    pub account_id: AccountId,
    pub liquidator: AccountId,
    pub exit_price: Price,
    pub equity: Amount,
    pub reward: Amount,
    // equity above the reward cap, kept by the pool
    pub retained: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopsUpdatedEvent {
    pub account_id: AccountId,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopClosedEvent {
    pub account_id: AccountId,
    pub closer: AccountId,
    pub exit_price: Price,
    pub pnl: Amount,
    pub close_fee: Amount,
    pub settlement: Amount,
    pub hit_stop_loss: bool,
    pub hit_take_profit: bool,
}

pub trait EventEmitter {
    fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) -> u64;
}

#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Sequence number of the newest event, 0 when empty.
    pub fn head(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events with `from <= seq <= to`, clamped to what exists.
    pub fn range(&self, from: u64, to: u64) -> &[Event] {
        let start = from.max(1) as usize - 1;
        let end = (to as usize).min(self.events.len());
        if start >= end {
            return &[];
        }
        &self.events[start..end]
    }
}

impl EventEmitter for EventLog {
    fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) -> u64 {
        let seq = self.events.len() as u64 + 1;
        self.events.push(Event {
            seq,
            timestamp,
            payload,
        });
        seq
    }
}
