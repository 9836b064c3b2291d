// 8.5: single sequencer. every caller (http, keeper, simulations) goes through this
// handle, so ledger mutations never interleave.

use super::core::Ledger;
use super::results::{CloseResult, LedgerError, LiquidationResult, OpenResult};
use crate::conditional::{StopCheck, StopLevels, StopUpdate};
use crate::events::Event;
use crate::position::Settlement;
use crate::types::{AccountId, Amount, Side};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Direct access for multi-step work that has to happen under one lock.
    pub async fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().await
    }

    pub async fn open(
        &self,
        account_id: AccountId,
        side: Side,
        leverage: u32,
        deposit: Amount,
    ) -> Result<OpenResult, LedgerError> {
        self.inner.lock().await.open(account_id, side, leverage, deposit)
    }

    pub async fn close(&self, account_id: AccountId) -> Result<CloseResult, LedgerError> {
        self.inner.lock().await.close(account_id)
    }

    pub async fn estimate_close(&self, account_id: AccountId) -> Result<Settlement, LedgerError> {
        self.inner.lock().await.estimate_close(account_id)
    }

    pub async fn set_stops(
        &self,
        account_id: AccountId,
        stop_loss: StopUpdate,
        take_profit: StopUpdate,
    ) -> Result<StopLevels, LedgerError> {
        self.inner.lock().await.set_stops(account_id, stop_loss, take_profit)
    }

    pub async fn set_stops_raw(
        &self,
        account_id: AccountId,
        stop_loss: Option<i128>,
        take_profit: Option<i128>,
    ) -> Result<StopLevels, LedgerError> {
        self.inner.lock().await.set_stops_raw(account_id, stop_loss, take_profit)
    }

    pub async fn can_liquidate(&self, account_id: AccountId) -> Result<bool, LedgerError> {
        self.inner.lock().await.can_liquidate(account_id)
    }

    pub async fn should_close(&self, account_id: AccountId) -> Result<StopCheck, LedgerError> {
        self.inner.lock().await.should_close(account_id)
    }

    pub async fn liquidate(
        &self,
        caller: AccountId,
        account_id: AccountId,
    ) -> Result<LiquidationResult, LedgerError> {
        self.inner.lock().await.liquidate(caller, account_id)
    }

    pub async fn close_if_triggered(
        &self,
        caller: AccountId,
        account_id: AccountId,
    ) -> Result<CloseResult, LedgerError> {
        self.inner.lock().await.close_if_triggered(caller, account_id)
    }

    pub async fn fund_pool(&self, amount: Amount) -> Result<Amount, LedgerError> {
        self.inner.lock().await.fund_pool(amount)
    }

    pub async fn withdraw_credit(&self, account_id: AccountId) -> Amount {
        self.inner.lock().await.withdraw_credit(account_id)
    }

    pub async fn pool_balance(&self) -> Amount {
        self.inner.lock().await.pool_balance()
    }

    pub async fn head(&self) -> u64 {
        self.inner.lock().await.head()
    }

    pub async fn events_range(&self, from: u64, to: u64) -> Vec<Event> {
        self.inner.lock().await.event_log().range(from, to).to_vec()
    }
}
