// index-perps: leveraged long/short positions on synthetic indexes.
// the ledger is deterministic given the index and the clock; daemons around it poll
// feeds, keep the index series continuous and liquidate what needs liquidating.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, AccountId, Side, Price, Amount, Leverage, Bps
//   2.x  conditional.rs: stop loss / take profit thresholds and updates
//   4.x  position.rs: position struct, pnl, settlement breakdown
//   6.x  liquidation.rs: liquidation status, reward, liquidation price
//   7.x  config.rs: fees, margins, polling and keeper cadence, env loading
//   8.x  ledger/: open, close, stops, liquidations, single sequencer
//   9.x  index/: tick store, aggregator, feeds, polling daemon, backfill
//   10.x keeper/: event-log replay, evaluation, bounded actions
//   11.x events.rs: ledger events, append-only log
//   12.x api/: ingest, candles, events, health over http
//   13.x candles.rs: OHLC buckets with continuity

pub mod candles;
pub mod conditional;
pub mod config;
pub mod events;
pub mod liquidation;
pub mod position;
pub mod types;

pub mod index;
pub mod keeper;
pub mod ledger;

pub mod api;

// re exports for convenience
pub use candles::*;
pub use conditional::*;
pub use config::*;
pub use events::*;
pub use ledger::*;
pub use liquidation::*;
pub use position::*;
pub use types::*;
