// 10.0: risk keeper. rebuilds the set of open accounts from the ledger's event log and
// liquidates or stop-closes whatever qualifies, a bounded number per loop.

mod daemon;
mod gateway;
mod open_set;

pub use daemon::{Keeper, KeeperPhase, KeeperReport};
pub use gateway::{GatewayError, KeeperAction, LedgerGateway};
pub use open_set::OpenSet;
