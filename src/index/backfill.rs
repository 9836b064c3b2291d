//! Backfill a market from historical data.
//!
//! History is read in fixed windows and only ticks newer than the store's
//! latest are appended, so running the same backfill twice is harmless.

use super::feed::FeedError;
use super::store::{IndexStore, PublisherId, Tick, TickKind, ValueDomain};
use super::IndexError;
use crate::types::{MarketId, Price, Timestamp};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_WINDOW_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HistoryPoint {
    #[serde(deserialize_with = "secs_or_millis")]
    pub time: Timestamp,
    pub value: Price,
}

fn secs_or_millis<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(Timestamp::from_secs_or_millis(raw))
}

/// Anything that can answer "what did this market look like between `from` and `to`".
#[async_trait]
pub trait HistorySource: Send {
    async fn fetch(&mut self, market: &MarketId, from: Timestamp, to: Timestamp) -> Result<Vec<HistoryPoint>, FeedError>;
}

/// In-memory history, sorted on construction.
#[derive(Debug, Clone, Default)]
pub struct VecHistory {
    points: Vec<HistoryPoint>,
}

impl VecHistory {
    pub fn new(mut points: Vec<HistoryPoint>) -> Self {
        points.sort_by_key(|p| p.time);
        Self { points }
    }

    /// Parses JSON lines of `{"time": .., "value": ..}`. Blank lines are skipped.
    pub fn from_jsonl(text: &str) -> Result<Self, BackfillError> {
        let mut points = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let point: HistoryPoint = serde_json::from_str(line).map_err(|e| BackfillError::Parse {
                line: n + 1,
                reason: e.to_string(),
            })?;
            points.push(point);
        }
        Ok(Self::new(points))
    }

    pub async fn from_jsonl_file(path: &Path) -> Result<Self, BackfillError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BackfillError::Io(format!("{}: {e}", path.display())))?;
        Self::from_jsonl(&text)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Time span covered, inclusive.
    pub fn span(&self) -> Option<(Timestamp, Timestamp)> {
        Some((self.points.first()?.time, self.points.last()?.time))
    }
}

#[async_trait]
impl HistorySource for VecHistory {
    async fn fetch(&mut self, _market: &MarketId, from: Timestamp, to: Timestamp) -> Result<Vec<HistoryPoint>, FeedError> {
        Ok(self
            .points
            .iter()
            .filter(|p| p.time >= from && p.time <= to)
            .copied()
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("history source failed: {0}")]
    Source(#[from] FeedError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("io error: {0}")]
    Io(String),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("window must be at least one second")]
    InvalidWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub windows: usize,
    pub fetched_points: usize,
    pub appended: usize,
    pub skipped_existing: usize,
    pub rejected: usize,
}

pub struct Backfill<'a> {
    store: &'a IndexStore,
    publisher: PublisherId,
    window_secs: i64,
}

impl<'a> Backfill<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self {
            store,
            publisher: PublisherId::new("backfill"),
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }

    pub fn with_window(mut self, window_secs: i64) -> Self {
        self.window_secs = window_secs;
        self
    }

    /// Scans `[from, to]` window by window and appends what the store is missing.
    pub async fn run(
        &self,
        source: &mut dyn HistorySource,
        market: &MarketId,
        domain: ValueDomain,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<BackfillStats, BackfillError> {
        if self.window_secs < 1 {
            return Err(BackfillError::InvalidWindow);
        }
        if !self.store.has_market(market) {
            self.store.register_market(market, domain);
        }
        self.store.allow_publisher(market, self.publisher.clone())?;

        tracing::info!(%market, %from, %to, window = self.window_secs, "backfill started");
        // the writer role is released whether or not the scan finished
        let result = self.scan(source, market, from, to).await;
        self.store.revoke_publisher(market, &self.publisher);

        let stats = result?;
        tracing::info!(
            %market,
            windows = stats.windows,
            appended = stats.appended,
            skipped = stats.skipped_existing,
            "backfill finished"
        );
        Ok(stats)
    }

    async fn scan(
        &self,
        source: &mut dyn HistorySource,
        market: &MarketId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<BackfillStats, BackfillError> {
        let mut stats = BackfillStats::default();
        let mut start = from;

        while start <= to {
            let end = start.plus_secs(self.window_secs - 1).min(to);
            let points = source.fetch(market, start, end).await?;
            stats.windows += 1;
            stats.fetched_points += points.len();

            for point in points {
                let latest = self.store.latest(market).map(|t| t.timestamp);
                if latest.is_some_and(|l| point.time <= l) {
                    stats.skipped_existing += 1;
                    continue;
                }
                let tick = Tick::new(market.clone(), point.time, point.value, TickKind::Backfill);
                match self.store.publish(&self.publisher, tick) {
                    Ok(()) => stats.appended += 1,
                    Err(IndexError::OutOfRange { value, .. }) => {
                        tracing::warn!(%market, time = %point.time, %value, "backfill value outside market domain");
                        stats.rejected += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            start = end.plus_secs(1);
        }
        Ok(stats)
    }
}
