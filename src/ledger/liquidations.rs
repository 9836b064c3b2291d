// 8.4: liquidation checks and execution.

use super::core::Ledger;
use super::results::{LedgerError, LiquidationResult};
use crate::events::{EventPayload, LiquidatedEvent};
use crate::liquidation::{calculate_liquidation_payout, evaluate_liquidation, LiquidationPayout, LiquidationStatus};
use crate::types::AccountId;

impl Ledger {
    /// `None` when the account has nothing open.
    pub fn liquidation_status(&self, account_id: AccountId) -> Result<Option<LiquidationStatus>, LedgerError> {
        let Some(position) = self.positions.get(&account_id) else {
            return Ok(None);
        };
        let index = self.index_price()?;
        Ok(Some(evaluate_liquidation(
            position,
            index,
            self.config.maintenance_margin,
        )?))
    }

    pub fn can_liquidate(&self, account_id: AccountId) -> Result<bool, LedgerError> {
        Ok(self
            .liquidation_status(account_id)?
            .is_some_and(|s| s.is_liquidatable()))
    }

    /// What `liquidate` would pay the caller right now.
    pub fn estimate_liquidation(&self, account_id: AccountId) -> Result<LiquidationPayout, LedgerError> {
        let position = self.require_position(account_id)?;
        let index = self.index_price()?;
        let equity = position.equity(index)?;
        Ok(calculate_liquidation_payout(
            equity,
            position.notional()?,
            self.config.liquidation_fee,
        )?)
    }

    // anyone can call; reward goes to the caller, positive equity above it stays in the pool
    pub fn liquidate(&mut self, caller: AccountId, account_id: AccountId) -> Result<LiquidationResult, LedgerError> {
        self.require_position(account_id)?;
        if !self.can_liquidate(account_id)? {
            return Err(LedgerError::NotLiquidatable(account_id));
        }

        let exit_price = self.index_price()?;
        let payout = self.estimate_liquidation(account_id)?;
        self.require_pool(payout.reward)?;

        let pool = self.pool.checked_sub(payout.reward)?;
        self.credit(caller, payout.reward)?;
        self.pool = pool;
        self.positions.remove(&account_id);

        tracing::info!(
            market = %self.market_id,
            account = %account_id,
            liquidator = %caller,
            exit = %exit_price,
            equity = %payout.equity,
            reward = %payout.reward,
            "position liquidated"
        );

        let seq = self.emit_event(EventPayload::Liquidated(LiquidatedEvent {
            account_id,
            liquidator: caller,
            exit_price,
            equity: payout.equity,
            reward: payout.reward,
            retained: payout.retained,
        }));

        Ok(LiquidationResult {
            account_id,
            liquidator: caller,
            exit_price,
            payout,
            seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::index::{IndexStore, PublisherId, Tick, TickKind, ValueDomain};
    use crate::types::{Amount, MarketId, Price, Side, Timestamp};
    use std::sync::Arc;

    const ONE: i128 = 100_000_000;

    struct Fixture {
        ledger: Ledger,
        store: Arc<IndexStore>,
        writer: PublisherId,
        ts: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let market = MarketId::new("test:score");
            let store = Arc::new(IndexStore::default());
            store.register_market(&market, ValueDomain::Positive);
            let writer = PublisherId::new("test");
            store.allow_publisher(&market, writer.clone()).unwrap();
            let mut ledger = Ledger::new(market, LedgerConfig::default(), store.clone());
            ledger.set_time(Timestamp::from_secs(0));
            ledger.fund_pool(Amount::new(100 * ONE)).unwrap();
            Self {
                ledger,
                store,
                writer,
                ts: 0,
            }
        }

        fn index(&mut self, raw: i128) {
            self.ts += 1;
            let tick = Tick::new(
                MarketId::new("test:score"),
                Timestamp::from_secs(self.ts),
                Price::from_raw_unchecked(raw),
                TickKind::Event,
            );
            self.store.publish(&self.writer, tick).unwrap();
        }
    }

    #[test]
    fn healthy_position_cannot_be_liquidated() {
        let mut f = Fixture::new();
        f.index(100 * ONE);
        f.ledger.open(AccountId(1), Side::Long, 10, Amount::new(ONE)).unwrap();

        assert!(!f.ledger.can_liquidate(AccountId(1)).unwrap());
        assert_eq!(
            f.ledger.liquidate(AccountId(2), AccountId(1)).unwrap_err(),
            LedgerError::NotLiquidatable(AccountId(1))
        );
        assert!(!f.ledger.can_liquidate(AccountId(42)).unwrap());
    }

    #[test]
    fn liquidation_pays_capped_reward() {
        let mut f = Fixture::new();
        f.index(100 * ONE);
        f.ledger.open(AccountId(1), Side::Long, 10, Amount::new(ONE)).unwrap();
        // margin 0.99 after the fee, notional 9.9, maintenance 0.61875
        f.index(96 * ONE);
        assert!(f.ledger.can_liquidate(AccountId(1)).unwrap());

        let pool_before = f.ledger.pool_balance();
        let result = f.ledger.liquidate(AccountId(2), AccountId(1)).unwrap();

        // equity 0.99 - 0.396 = 0.594, reward capped at 0.5% of 9.9
        assert_eq!(result.payout.equity, Amount::new(59_400_000));
        assert_eq!(result.payout.reward, Amount::new(4_950_000));
        assert_eq!(result.payout.retained, Amount::new(54_450_000));
        assert_eq!(f.ledger.credit_of(AccountId(2)), Amount::new(4_950_000));
        assert_eq!(f.ledger.credit_of(AccountId(1)), Amount::zero());
        assert_eq!(f.ledger.pool_balance(), Amount::new(pool_before.value() - 4_950_000));
        assert!(f.ledger.position(AccountId(1)).is_none());
    }

    #[test]
    fn second_liquidation_fails() {
        let mut f = Fixture::new();
        f.index(100 * ONE);
        f.ledger.open(AccountId(1), Side::Short, 50, Amount::new(ONE)).unwrap();
        f.index(103 * ONE);

        f.ledger.liquidate(AccountId(2), AccountId(1)).unwrap();
        let err = f.ledger.liquidate(AccountId(3), AccountId(1)).unwrap_err();
        assert!(err.is_position_gone());
    }

    #[test]
    fn bankrupt_position_pays_nothing() {
        let mut f = Fixture::new();
        f.index(100 * ONE);
        f.ledger.open(AccountId(1), Side::Long, 100, Amount::new(ONE)).unwrap();
        f.index(90 * ONE);

        let result = f.ledger.liquidate(AccountId(2), AccountId(1)).unwrap();
        assert!(result.payout.equity.is_negative());
        assert_eq!(result.payout.reward, Amount::zero());
        assert_eq!(f.ledger.credit_of(AccountId(2)), Amount::zero());
    }
}
