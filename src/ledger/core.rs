// 8.0 ledger/core.rs: the ledger. one market, all positions, the pool and the treasury.

use super::results::LedgerError;
use crate::config::LedgerConfig;
use crate::events::{Event, EventEmitter, EventLog, EventPayload};
use crate::index::IndexStore;
use crate::position::Position;
use crate::types::{AccountId, Amount, MarketId, Price, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Clock {
    System,
    Fixed(Timestamp),
}

/** 8.1: main ledger struct. all mutable state lives here, the index is read only */
#[derive(Debug)]
pub struct Ledger {
    pub(super) market_id: MarketId,
    pub(super) config: LedgerConfig,
    pub(super) index: Arc<IndexStore>,
    // live positions only; closing removes the entry
    pub(super) positions: HashMap<AccountId, Position>,
    // collateral backing every position plus protocol revenue
    pub(super) pool: Amount,
    pub(super) treasury: Amount,
    // payouts owed to owners and liquidators
    pub(super) credits: HashMap<AccountId, Amount>,
    pub(super) events: EventLog,
    clock: Clock,
}

impl Ledger {
    pub fn new(market_id: MarketId, config: LedgerConfig, index: Arc<IndexStore>) -> Self {
        Self {
            market_id,
            config,
            index,
            positions: HashMap::new(),
            pool: Amount::zero(),
            treasury: Amount::zero(),
            credits: HashMap::new(),
            events: EventLog::new(),
            clock: Clock::System,
        }
    }

    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // pins the clock, used by simulations and tests
    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.clock = Clock::Fixed(timestamp);
    }

    pub fn time(&self) -> Timestamp {
        match self.clock {
            Clock::System => Timestamp::now(),
            Clock::Fixed(ts) => ts,
        }
    }

    pub fn position(&self, account_id: AccountId) -> Option<&Position> {
        self.positions.get(&account_id)
    }

    pub fn has_open_position(&self, account_id: AccountId) -> bool {
        self.positions.contains_key(&account_id)
    }

    pub fn positions_iter(&self) -> impl Iterator<Item = (&AccountId, &Position)> {
        self.positions.iter()
    }

    pub fn open_interest(&self) -> usize {
        self.positions.len()
    }

    pub fn pool_balance(&self) -> Amount {
        self.pool
    }

    pub fn treasury_balance(&self) -> Amount {
        self.treasury
    }

    pub fn credit_of(&self, account_id: AccountId) -> Amount {
        self.credits.get(&account_id).copied().unwrap_or_default()
    }

    /// Seeds the pool with liquidity that backs trader profits.
    pub fn fund_pool(&mut self, amount: Amount) -> Result<Amount, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }
        self.pool = self.pool.checked_add(amount)?;
        tracing::info!(market = %self.market_id, %amount, pool = %self.pool, "pool funded");
        Ok(self.pool)
    }

    /// Pays out and zeroes an account's credit balance.
    pub fn withdraw_credit(&mut self, account_id: AccountId) -> Amount {
        let amount = self.credits.remove(&account_id).unwrap_or_default();
        if amount.is_positive() {
            tracing::info!(market = %self.market_id, account = %account_id, %amount, "credit withdrawn");
        }
        amount
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn head(&self) -> u64 {
        self.events.head()
    }

    /// Latest index value for this ledger's market. Zero is a valid reading here.
    pub fn index_price(&self) -> Result<Price, LedgerError> {
        self.index
            .latest_value(&self.market_id)
            .ok_or_else(|| LedgerError::NoIndexPrice(self.market_id.clone()))
    }

    pub(super) fn require_position(&self, account_id: AccountId) -> Result<&Position, LedgerError> {
        self.positions
            .get(&account_id)
            .ok_or(LedgerError::NoOpenPosition(account_id))
    }

    pub(super) fn require_pool(&self, needed: Amount) -> Result<(), LedgerError> {
        if needed > self.pool {
            return Err(LedgerError::InsufficientFunds {
                needed,
                available: self.pool,
            });
        }
        Ok(())
    }

    pub(super) fn credit(&mut self, account_id: AccountId, amount: Amount) -> Result<(), LedgerError> {
        if amount.value() == 0 {
            return Ok(());
        }
        let entry = self.credits.entry(account_id).or_default();
        *entry = entry.checked_add(amount)?;
        Ok(())
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) -> u64 {
        let now = self.time();
        tracing::debug!(market = %self.market_id, account = %payload.account_id(), ?payload, "ledger event");
        self.events.emit(now, payload)
    }
}
