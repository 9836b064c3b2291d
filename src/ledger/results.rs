// 8.0.2: result types and errors for ledger operations.

use crate::conditional::{StopCheck, StopsError};
use crate::liquidation::LiquidationPayout;
use crate::position::Settlement;
use crate::types::{AccountId, Amount, MarketId, Overflow, Price};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct OpenResult {
    pub account_id: AccountId,
    pub entry_price: Price,
    pub fee: Amount,
    pub margin: Amount,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseResult {
    pub account_id: AccountId,
    pub settlement: Settlement,
    // set when the close came from a triggered stop
    pub stops: Option<StopCheck>,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiquidationResult {
    pub account_id: AccountId,
    pub liquidator: AccountId,
    pub exit_price: Price,
    pub payout: LiquidationPayout,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("leverage {requested} outside 1..={max}")]
    InvalidLeverage { requested: u32, max: u32 },

    #[error("margin deposit must be positive")]
    ZeroMargin,

    #[error("account {0} already has an open position")]
    PositionAlreadyOpen(AccountId),

    #[error("account {0} has no open position")]
    NoOpenPosition(AccountId),

    #[error("no index value available for market {0}")]
    NoIndexPrice(MarketId),

    #[error("index value for market {0} is zero")]
    ZeroIndexPrice(MarketId),

    #[error("position of {0} is not liquidatable")]
    NotLiquidatable(AccountId),

    #[error("stops of {0} are not triggered")]
    StopsNotTriggered(AccountId),

    #[error("invalid stops: {0}")]
    InvalidStops(#[from] StopsError),

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error(transparent)]
    Overflow(#[from] Overflow),
}

impl LedgerError {
    /// True when the target position no longer exists, e.g. another caller got there first.
    pub fn is_position_gone(&self) -> bool {
        matches!(self, LedgerError::NoOpenPosition(_))
    }
}
