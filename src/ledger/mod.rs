// 8.0: position ledger. opens, closes and liquidates positions against one index market.
// deterministic given the index and the clock; no I/O of its own.

mod core;
mod liquidations;
mod positions;
mod results;
mod shared;

pub use self::core::Ledger;
pub use results::{CloseResult, LedgerError, LiquidationResult, OpenResult};
pub use shared::SharedLedger;
