// 9.0: index store. one append-only tick series per market, newest last.
// writes go through an allow-list of publishers; readers (ledger, candles, http) never mutate.

use super::IndexError;
use crate::types::{MarketId, Price, Timestamp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

pub const DEFAULT_MAX_TICKS: usize = 10_000;
pub const DEFAULT_MAX_EVENTS: usize = 200;

/// What values a market may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueDomain {
    /// Unbounded index, strictly positive.
    Positive,
    /// Percentage index, 0 to 100 inclusive.
    Percentage,
}

impl ValueDomain {
    pub fn contains(&self, value: Price) -> bool {
        match self {
            ValueDomain::Positive => !value.is_zero(),
            ValueDomain::Percentage => value <= Price::from_units(100),
        }
    }
}

/// How a tick came to be. Neutral ticks repeat the previous value to keep charts gapless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickKind {
    Event,
    Neutral,
    Forced,
    Ingested,
    Backfill,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: Timestamp,
    pub value: Price,
    pub market: MarketId,
    pub kind: TickKind,
}

impl Tick {
    pub fn new(market: MarketId, timestamp: Timestamp, value: Price, kind: TickKind) -> Self {
        Self {
            timestamp,
            value,
            market,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublisherId(pub String);

impl PublisherId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    // role used by the authenticated http ingestion path
    pub fn ingest() -> Self {
        Self("ingest".to_string())
    }
}

/// Display-only record of what moved an index (sport, delta, league...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEvent {
    pub timestamp: Timestamp,
    pub market: MarketId,
    pub value: Option<Price>,
    pub meta: serde_json::Value,
}

/// How far an aggregator has read one feed source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCursor {
    pub counter: Option<(u64, u64)>,
    pub event_id: Option<u64>,
    pub absolute: Option<Timestamp>,
}

/// Aggregator state kept next to the series so a re-attached aggregator resumes
/// instead of re-applying readings it already folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub working: Price,
    pub cursors: HashMap<String, SourceCursor>,
}

#[derive(Debug)]
struct MarketSeries {
    domain: ValueDomain,
    publishers: HashSet<PublisherId>,
    ticks: VecDeque<Tick>,
    events: VecDeque<IndexEvent>,
    // survives trimming so the event feed never goes blank once populated
    last_event: Option<IndexEvent>,
    checkpoint: Option<Checkpoint>,
}

impl MarketSeries {
    fn new(domain: ValueDomain) -> Self {
        Self {
            domain,
            publishers: HashSet::new(),
            ticks: VecDeque::new(),
            events: VecDeque::new(),
            last_event: None,
            checkpoint: None,
        }
    }
}

/** 9.1: the store itself. DashMap so daemons and handlers share it without a global lock */
#[derive(Debug)]
pub struct IndexStore {
    series: DashMap<MarketId, MarketSeries>,
    max_ticks: usize,
    max_events: usize,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TICKS, DEFAULT_MAX_EVENTS)
    }
}

impl IndexStore {
    pub fn new(max_ticks: usize, max_events: usize) -> Self {
        Self {
            series: DashMap::new(),
            max_ticks: max_ticks.max(1),
            max_events: max_events.max(1),
        }
    }

    /// Registers a market, or updates its domain if it already exists.
    pub fn register_market(&self, market: &MarketId, domain: ValueDomain) {
        self.series
            .entry(market.clone())
            .and_modify(|s| s.domain = domain)
            .or_insert_with(|| MarketSeries::new(domain));
    }

    pub fn has_market(&self, market: &MarketId) -> bool {
        self.series.contains_key(market)
    }

    pub fn markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self.series.iter().map(|e| e.key().clone()).collect();
        markets.sort();
        markets
    }

    pub fn domain(&self, market: &MarketId) -> Option<ValueDomain> {
        self.series.get(market).map(|s| s.domain)
    }

    pub fn allow_publisher(&self, market: &MarketId, publisher: PublisherId) -> Result<(), IndexError> {
        let mut series = self
            .series
            .get_mut(market)
            .ok_or_else(|| IndexError::UnknownMarket(market.clone()))?;
        series.publishers.insert(publisher);
        Ok(())
    }

    pub fn revoke_publisher(&self, market: &MarketId, publisher: &PublisherId) {
        if let Some(mut series) = self.series.get_mut(market) {
            series.publishers.remove(publisher);
        }
    }

    pub fn is_publisher(&self, market: &MarketId, publisher: &PublisherId) -> bool {
        self.series
            .get(market)
            .is_some_and(|s| s.publishers.contains(publisher))
    }

    /// Grants the ingest role unless another writer already owns the market.
    pub fn claim_for_ingest(&self, market: &MarketId, domain: ValueDomain) -> Result<(), IndexError> {
        let mut series = self
            .series
            .entry(market.clone())
            .or_insert_with(|| MarketSeries::new(domain));
        let ingest = PublisherId::ingest();
        if series.publishers.is_empty() {
            series.publishers.insert(ingest);
            return Ok(());
        }
        if series.publishers.contains(&ingest) {
            return Ok(());
        }
        Err(IndexError::Unauthorized {
            publisher: ingest,
            market: market.clone(),
        })
    }

    /// Appends a tick. Checks the allow-list, the value domain and timestamp order.
    pub fn publish(&self, publisher: &PublisherId, tick: Tick) -> Result<(), IndexError> {
        let mut series = self
            .series
            .get_mut(&tick.market)
            .ok_or_else(|| IndexError::UnknownMarket(tick.market.clone()))?;

        if !series.publishers.contains(publisher) {
            return Err(IndexError::Unauthorized {
                publisher: publisher.clone(),
                market: tick.market.clone(),
            });
        }

        if !series.domain.contains(tick.value) {
            return Err(IndexError::OutOfRange {
                market: tick.market.clone(),
                value: tick.value,
                domain: series.domain,
            });
        }

        if let Some(last) = series.ticks.back() {
            if tick.timestamp < last.timestamp {
                return Err(IndexError::OutOfOrder {
                    market: tick.market.clone(),
                    latest: last.timestamp,
                    attempted: tick.timestamp,
                });
            }
        }

        tracing::trace!(market = %tick.market, value = %tick.value, kind = ?tick.kind, "tick appended");
        series.ticks.push_back(tick);
        while series.ticks.len() > self.max_ticks {
            series.ticks.pop_front();
        }
        Ok(())
    }

    pub fn latest(&self, market: &MarketId) -> Option<Tick> {
        self.series.get(market).and_then(|s| s.ticks.back().cloned())
    }

    pub fn latest_value(&self, market: &MarketId) -> Option<Price> {
        self.series.get(market).and_then(|s| s.ticks.back().map(|t| t.value))
    }

    pub fn ticks(&self, market: &MarketId) -> Vec<Tick> {
        self.series
            .get(market)
            .map(|s| s.ticks.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ticks with `from <= timestamp <= to`, oldest first.
    pub fn range(&self, market: &MarketId, from: Timestamp, to: Timestamp) -> Vec<Tick> {
        self.series
            .get(market)
            .map(|s| {
                s.ticks
                    .iter()
                    .filter(|t| t.timestamp >= from && t.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // (time, value) pairs for the candle builder
    pub fn points(&self, market: &MarketId) -> Vec<(Timestamp, Price)> {
        self.series
            .get(market)
            .map(|s| s.ticks.iter().map(|t| (t.timestamp, t.value)).collect())
            .unwrap_or_default()
    }

    /// Stores the aggregator checkpoint. Only an allowed publisher may write it.
    pub fn save_checkpoint(
        &self,
        publisher: &PublisherId,
        market: &MarketId,
        checkpoint: Checkpoint,
    ) -> Result<(), IndexError> {
        let mut series = self
            .series
            .get_mut(market)
            .ok_or_else(|| IndexError::UnknownMarket(market.clone()))?;
        if !series.publishers.contains(publisher) {
            return Err(IndexError::Unauthorized {
                publisher: publisher.clone(),
                market: market.clone(),
            });
        }
        series.checkpoint = Some(checkpoint);
        Ok(())
    }

    pub fn checkpoint(&self, market: &MarketId) -> Option<Checkpoint> {
        self.series.get(market).and_then(|s| s.checkpoint.clone())
    }

    pub fn tick_count(&self, market: &MarketId) -> usize {
        self.series.get(market).map(|s| s.ticks.len()).unwrap_or(0)
    }

    pub fn record_event(&self, event: IndexEvent) -> Result<(), IndexError> {
        let mut series = self
            .series
            .get_mut(&event.market)
            .ok_or_else(|| IndexError::UnknownMarket(event.market.clone()))?;
        series.last_event = Some(event.clone());
        series.events.push_back(event);
        while series.events.len() > self.max_events {
            series.events.pop_front();
        }
        Ok(())
    }

    /// Newest first. Falls back to the last event ever seen when the live list is empty.
    pub fn recent_events(&self, market: &MarketId, limit: usize) -> Vec<IndexEvent> {
        let Some(series) = self.series.get(market) else {
            return Vec::new();
        };
        if series.events.is_empty() {
            return series.last_event.iter().cloned().take(limit.max(1)).collect();
        }
        series.events.iter().rev().take(limit).cloned().collect()
    }

    /// Drops display events older than `before`, keeping the sticky last one.
    pub fn prune_events(&self, market: &MarketId, before: Timestamp) {
        if let Some(mut series) = self.series.get_mut(market) {
            series.events.retain(|e| e.timestamp >= before);
        }
    }
}
