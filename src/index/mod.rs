// 9.0: index side of the system. the store keeps the series, aggregators compute new
// values from feed readings, daemons poll feeds and publish, backfill replays history.

mod aggregator;
pub mod backfill;
mod backoff;
mod daemon;
pub mod feed;
mod store;

pub use aggregator::{Aggregator, CombineMode, MarketSpec, PublishOutcome, Reading};
pub use backoff::Backoff;
pub use daemon::AggregatorDaemon;
pub use feed::{FeedError, FeedSource};
pub use store::{
    Checkpoint, IndexEvent, IndexStore, PublisherId, SourceCursor, Tick, TickKind, ValueDomain, DEFAULT_MAX_EVENTS,
    DEFAULT_MAX_TICKS,
};

use crate::types::{MarketId, Overflow, Price, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("publisher {publisher:?} may not write to market {market}")]
    Unauthorized { publisher: PublisherId, market: MarketId },

    #[error("market {0} is not registered")]
    UnknownMarket(MarketId),

    #[error("tick for {market} at {attempted} is older than the latest at {latest}")]
    OutOfOrder {
        market: MarketId,
        latest: Timestamp,
        attempted: Timestamp,
    },

    #[error("value {value} is outside the {domain:?} domain of {market}")]
    OutOfRange {
        market: MarketId,
        value: Price,
        domain: ValueDomain,
    },

    #[error(transparent)]
    Overflow(#[from] Overflow),
}
