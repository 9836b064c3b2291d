//! Turns feed readings into index values.
//!
//! Each aggregator drives exactly one market. Readings pass through per-source
//! cursors first, so a reading that was already applied (a replayed poll, a
//! duplicated event id, a stale absolute value) never moves the index twice.
//! Values that survive the cursors are folded into a working value, and the
//! publish guard decides whether the working value is worth a new tick.

use super::store::{Checkpoint, IndexEvent, IndexStore, PublisherId, SourceCursor, Tick, TickKind, ValueDomain};
use super::IndexError;
use crate::config::AggregatorConfig;
use crate::types::{mul_div, MarketId, Overflow, Price, Timestamp, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How qualifying readings combine with the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CombineMode {
    /// `old + net * step`, never below `floor`.
    Additive { step: Price, floor: Price },
    /// `old + old * net * pct_bps / 10000`, never below `floor`.
    Multiplicative { pct_bps: u32, floor: Price },
    /// The reading carries the value; it is clamped into `[min, max]`.
    Absolute { min: Price, max: Price },
}

impl CombineMode {
    pub fn additive(floor: Price) -> Self {
        CombineMode::Additive {
            step: Price::from_units(1),
            floor,
        }
    }

    fn combine(&self, old: Price, net: i64) -> Result<Option<Price>, Overflow> {
        let net = net as i128;
        match *self {
            CombineMode::Additive { step, floor } => {
                let moved = net.checked_mul(step.raw()).ok_or(Overflow)?;
                let raw = old.raw().checked_add(moved).ok_or(Overflow)?;
                Ok(Some(Price::from_raw_unchecked(raw.max(floor.raw()))))
            }
            CombineMode::Multiplicative { pct_bps, floor } => {
                let factor = net.checked_mul(pct_bps as i128).ok_or(Overflow)?;
                let moved = mul_div(old.raw(), factor, BPS_DENOMINATOR)?;
                let raw = old.raw().checked_add(moved).ok_or(Overflow)?;
                Ok(Some(Price::from_raw_unchecked(raw.max(floor.raw()))))
            }
            // counts mean nothing to a market quoted directly
            CombineMode::Absolute { .. } => Ok(None),
        }
    }

    fn absolute(&self, value: Price) -> Price {
        match *self {
            CombineMode::Additive { floor, .. } | CombineMode::Multiplicative { floor, .. } => value.max(floor),
            CombineMode::Absolute { min, max } => value.max(min).min(max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSpec {
    pub market: MarketId,
    pub domain: ValueDomain,
    pub mode: CombineMode,
    pub initial: Price,
    // republish the unchanged value when a poll brings nothing new
    pub continuity: bool,
}

/// One normalized observation from a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    /// Cumulative counts for a source, e.g. a team's running score.
    Counter {
        source: String,
        favorable: u64,
        unfavorable: u64,
        timestamp: Timestamp,
        #[serde(default)]
        meta: Option<serde_json::Value>,
    },
    /// A signed change with a source-local, increasing id.
    Delta {
        source: String,
        event_id: u64,
        delta: i64,
        timestamp: Timestamp,
        #[serde(default)]
        meta: Option<serde_json::Value>,
    },
    /// A value to adopt directly.
    Absolute {
        source: String,
        value: Price,
        timestamp: Timestamp,
        #[serde(default)]
        meta: Option<serde_json::Value>,
    },
}

impl Reading {
    pub fn source(&self) -> &str {
        match self {
            Reading::Counter { source, .. } | Reading::Delta { source, .. } | Reading::Absolute { source, .. } => {
                source
            }
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Reading::Counter { timestamp, .. }
            | Reading::Delta { timestamp, .. }
            | Reading::Absolute { timestamp, .. } => *timestamp,
        }
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        match self {
            Reading::Counter { meta, .. } | Reading::Delta { meta, .. } | Reading::Absolute { meta, .. } => {
                meta.as_ref()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(Tick),
    // the working value moved but not by enough
    Suppressed { candidate: Price, last: Price },
    Idle,
}

#[derive(Debug, Clone, Copy)]
struct Published {
    at: Timestamp,
    value: Price,
}

#[derive(Debug)]
pub struct Aggregator {
    spec: MarketSpec,
    publisher: PublisherId,
    min_change: Price,
    stale_after_secs: i64,
    working: Price,
    // last non-neutral publish; staleness is measured from here
    last_published: Option<Published>,
    cursors: HashMap<String, SourceCursor>,
}

impl Aggregator {
    pub fn new(spec: MarketSpec, publisher: PublisherId, config: &AggregatorConfig) -> Self {
        let working = bound(&spec, spec.initial);
        Self {
            spec,
            publisher,
            min_change: config.min_change,
            stale_after_secs: config.stale_after.as_secs() as i64,
            working,
            last_published: None,
            cursors: HashMap::new(),
        }
    }

    pub fn market(&self) -> &MarketId {
        &self.spec.market
    }

    pub fn spec(&self) -> &MarketSpec {
        &self.spec
    }

    pub fn publisher(&self) -> &PublisherId {
        &self.publisher
    }

    pub fn working_value(&self) -> Price {
        self.working
    }

    /// Registers the market, claims the writer role and resumes from the stored checkpoint
    /// and latest tick if any.
    pub fn attach(&mut self, store: &IndexStore) -> Result<(), IndexError> {
        store.register_market(&self.spec.market, self.spec.domain);
        store.allow_publisher(&self.spec.market, self.publisher.clone())?;
        if let Some(tick) = store.latest(&self.spec.market) {
            self.working = tick.value;
            self.last_published = Some(Published {
                at: tick.timestamp,
                value: tick.value,
            });
        }
        // the checkpoint also covers readings that were folded in but never published
        if let Some(checkpoint) = store.checkpoint(&self.spec.market) {
            tracing::debug!(market = %self.spec.market, sources = checkpoint.cursors.len(), "resuming from checkpoint");
            self.working = bound(&self.spec, checkpoint.working);
            self.cursors = checkpoint.cursors;
        }
        Ok(())
    }

    /// Folds one reading into the working value. `None` when the cursors filtered it out.
    pub fn apply(&mut self, reading: &Reading) -> Result<Option<Price>, IndexError> {
        let cursor = self.cursors.entry(reading.source().to_string()).or_default();

        let next = match reading {
            Reading::Counter {
                favorable,
                unfavorable,
                ..
            } => {
                let (seen_fav, seen_unfav) = cursor.counter.unwrap_or((0, 0));
                if *favorable < seen_fav || *unfavorable < seen_unfav {
                    // counter reset upstream: re-baseline, apply nothing
                    cursor.counter = Some((*favorable, *unfavorable));
                    return Ok(None);
                }
                let gained = i64::try_from(favorable - seen_fav).map_err(|_| Overflow)?;
                let lost = i64::try_from(unfavorable - seen_unfav).map_err(|_| Overflow)?;
                if gained == 0 && lost == 0 {
                    return Ok(None);
                }
                let net = gained.checked_sub(lost).ok_or(Overflow)?;
                let next = self.spec.mode.combine(self.working, net)?;
                cursor.counter = Some((*favorable, *unfavorable));
                next
            }
            Reading::Delta { event_id, delta, .. } => {
                if cursor.event_id.is_some_and(|seen| *event_id <= seen) {
                    return Ok(None);
                }
                let next = self.spec.mode.combine(self.working, *delta)?;
                cursor.event_id = Some(*event_id);
                next
            }
            Reading::Absolute { value, timestamp, .. } => {
                if cursor.absolute.is_some_and(|seen| *timestamp <= seen) {
                    return Ok(None);
                }
                cursor.absolute = Some(*timestamp);
                Some(self.spec.mode.absolute(*value))
            }
        };

        let Some(value) = next else {
            tracing::trace!(market = %self.spec.market, source = reading.source(), "reading does not apply to this mode");
            return Ok(None);
        };

        self.working = bound(&self.spec, value);
        Ok(Some(self.working))
    }

    /// One poll's worth of readings: apply, record display events, then maybe publish.
    pub fn poll(&mut self, store: &IndexStore, readings: &[Reading], now: Timestamp) -> Result<PublishOutcome, IndexError> {
        let folded = self.fold(store, readings);
        // cursors advanced by earlier readings must stick even when a later one failed
        if !readings.is_empty() {
            self.save_checkpoint(store)?;
        }
        let qualified = folded?;
        self.publish(store, now, qualified > 0)
    }

    fn fold(&mut self, store: &IndexStore, readings: &[Reading]) -> Result<usize, IndexError> {
        let mut qualified = 0usize;
        for reading in readings {
            let Some(value) = self.apply(reading)? else {
                continue;
            };
            qualified += 1;
            if let Some(meta) = reading.meta() {
                store.record_event(IndexEvent {
                    timestamp: reading.timestamp(),
                    market: self.spec.market.clone(),
                    value: Some(value),
                    meta: meta.clone(),
                })?;
            }
        }
        Ok(qualified)
    }

    fn save_checkpoint(&self, store: &IndexStore) -> Result<(), IndexError> {
        let checkpoint = Checkpoint {
            working: self.working,
            cursors: self.cursors.clone(),
        };
        store.save_checkpoint(&self.publisher, &self.spec.market, checkpoint)
    }

    // 9.2: publish guard
    fn publish(&mut self, store: &IndexStore, now: Timestamp, qualified: bool) -> Result<PublishOutcome, IndexError> {
        let (value, kind) = match self.last_published {
            None => (self.working, TickKind::Event),
            Some(last) => {
                let diff = self.working.abs_diff(last.value);
                let moved = diff > 0 && diff >= self.min_change.raw();
                let stale = now.seconds_since(last.at) >= self.stale_after_secs;
                if moved {
                    (self.working, TickKind::Event)
                } else if stale {
                    (self.working, TickKind::Forced)
                } else if !qualified && self.spec.continuity {
                    (last.value, TickKind::Neutral)
                } else if qualified {
                    tracing::trace!(
                        market = %self.spec.market,
                        candidate = %self.working,
                        last = %last.value,
                        "change below threshold, not published"
                    );
                    return Ok(PublishOutcome::Suppressed {
                        candidate: self.working,
                        last: last.value,
                    });
                } else {
                    return Ok(PublishOutcome::Idle);
                }
            }
        };

        let tick = Tick::new(self.spec.market.clone(), now, value, kind);
        store.publish(&self.publisher, tick.clone())?;
        if kind != TickKind::Neutral {
            self.last_published = Some(Published { at: now, value });
        }
        tracing::debug!(market = %self.spec.market, %value, ?kind, "index published");
        Ok(PublishOutcome::Published(tick))
    }
}

// keeps the working value inside the market's domain
fn bound(spec: &MarketSpec, value: Price) -> Price {
    match spec.domain {
        ValueDomain::Positive => value.max(Price::from_raw_unchecked(1)),
        ValueDomain::Percentage => value.min(Price::from_units(100)),
    }
}
