// 10.1: the keeper's view of the ledger. async so the same keeper can drive an
// in-process ledger or a remote one.

use crate::conditional::StopCheck;
use crate::events::Event;
use crate::ledger::{LedgerError, SharedLedger};
use crate::types::{AccountId, Amount};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperAction {
    Liquidate(AccountId),
    CloseTriggered(AccountId),
}

impl KeeperAction {
    pub fn account(&self) -> AccountId {
        match self {
            KeeperAction::Liquidate(a) | KeeperAction::CloseTriggered(a) => *a,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("transient gateway failure: {0}")]
    Transient(String),

    #[error("gateway rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("rejected by ledger: {0}")]
    Rejected(LedgerError),
}

impl GatewayError {
    pub fn is_position_gone(&self) -> bool {
        matches!(self, GatewayError::Rejected(e) if e.is_position_gone())
    }
}

impl From<LedgerError> for GatewayError {
    fn from(e: LedgerError) -> Self {
        match e {
            // the index may simply not have ticked yet
            LedgerError::NoIndexPrice(_) => GatewayError::Transient(e.to_string()),
            other => GatewayError::Rejected(other),
        }
    }
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Sequence number of the newest ledger event.
    async fn head(&self) -> Result<u64, GatewayError>;

    /// Events with `from <= seq <= to`.
    async fn events(&self, from: u64, to: u64) -> Result<Vec<Event>, GatewayError>;

    async fn can_liquidate(&self, account: AccountId) -> Result<bool, GatewayError>;

    async fn should_close(&self, account: AccountId) -> Result<StopCheck, GatewayError>;

    /// What the pool would have to pay out if `action` ran now.
    async fn estimate_payout(&self, action: KeeperAction) -> Result<Amount, GatewayError>;

    async fn pool_balance(&self) -> Result<Amount, GatewayError>;

    async fn liquidate(&self, caller: AccountId, account: AccountId) -> Result<u64, GatewayError>;

    async fn close_if_triggered(&self, caller: AccountId, account: AccountId) -> Result<u64, GatewayError>;
}

#[async_trait]
impl LedgerGateway for SharedLedger {
    async fn head(&self) -> Result<u64, GatewayError> {
        Ok(SharedLedger::head(self).await)
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<Event>, GatewayError> {
        Ok(self.events_range(from, to).await)
    }

    async fn can_liquidate(&self, account: AccountId) -> Result<bool, GatewayError> {
        Ok(SharedLedger::can_liquidate(self, account).await?)
    }

    async fn should_close(&self, account: AccountId) -> Result<StopCheck, GatewayError> {
        Ok(SharedLedger::should_close(self, account).await?)
    }

    async fn estimate_payout(&self, action: KeeperAction) -> Result<Amount, GatewayError> {
        let ledger = self.lock().await;
        let payout = match action {
            KeeperAction::Liquidate(account) => ledger.estimate_liquidation(account)?.reward,
            KeeperAction::CloseTriggered(account) => ledger
                .estimate_close(account)?
                .pool_outflow()
                .map_err(LedgerError::from)?,
        };
        Ok(payout)
    }

    async fn pool_balance(&self) -> Result<Amount, GatewayError> {
        Ok(SharedLedger::pool_balance(self).await)
    }

    async fn liquidate(&self, caller: AccountId, account: AccountId) -> Result<u64, GatewayError> {
        Ok(SharedLedger::liquidate(self, caller, account).await?.seq)
    }

    async fn close_if_triggered(&self, caller: AccountId, account: AccountId) -> Result<u64, GatewayError> {
        Ok(SharedLedger::close_if_triggered(self, caller, account).await?.seq)
    }
}
