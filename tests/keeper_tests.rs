//! Keeper tests
//!
//! Drive the keeper against an in-process ledger, sometimes through a gateway that
//! misbehaves on purpose, and check what it liquidates, closes, skips and retries.

use async_trait::async_trait;
use index_perps::index::{IndexStore, PublisherId, Tick, TickKind, ValueDomain};
use index_perps::keeper::{GatewayError, Keeper, KeeperAction, LedgerGateway, OpenSet};
use index_perps::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ONE: i128 = 100_000_000;
const KEEPER: AccountId = AccountId(999);

struct Market {
    ledger: SharedLedger,
    store: Arc<IndexStore>,
    writer: PublisherId,
    market: MarketId,
    ts: i64,
}

impl Market {
    fn new(initial: i64, pool: i128) -> Self {
        let market = MarketId::new("test:keeper");
        let store = Arc::new(IndexStore::default());
        store.register_market(&market, ValueDomain::Positive);
        let writer = PublisherId::new("test");
        store.allow_publisher(&market, writer.clone()).unwrap();

        let mut ledger = Ledger::new(market.clone(), LedgerConfig::default(), store.clone());
        ledger.set_time(Timestamp::from_secs(0));
        if pool > 0 {
            ledger.fund_pool(Amount::new(pool)).unwrap();
        }

        let mut m = Self {
            ledger: SharedLedger::new(ledger),
            store,
            writer,
            market,
            ts: 0,
        };
        m.set_index(initial);
        m
    }

    fn set_index(&mut self, units: i64) {
        self.ts += 1;
        let tick = Tick::new(
            self.market.clone(),
            Timestamp::from_secs(self.ts),
            Price::from_units(units),
            TickKind::Event,
        );
        self.store.publish(&self.writer, tick).unwrap();
    }

    async fn open_longs(&self, accounts: std::ops::RangeInclusive<u64>, leverage: u32) {
        for id in accounts {
            self.ledger
                .open(AccountId(id), Side::Long, leverage, Amount::new(ONE))
                .await
                .unwrap();
        }
    }
}

fn config(max_actions: usize) -> KeeperConfig {
    KeeperConfig {
        max_actions_per_loop: max_actions,
        scan_chunk: 2,
        keeper_account: KEEPER,
        ..KeeperConfig::default()
    }
}

/// Wraps the real ledger and fails on command.
#[derive(Clone)]
struct FlakyGateway {
    inner: SharedLedger,
    // remaining evaluation failures per account
    evaluation_failures: Arc<Mutex<HashMap<AccountId, u32>>>,
    // actions that race with another caller and find the position gone
    gone_on_action: Arc<Mutex<HashSet<AccountId>>>,
    rate_limit: Option<Duration>,
    // serve the log only up to this seq, however far the head says it goes
    log_visible_to: Option<u64>,
}

impl FlakyGateway {
    fn new(inner: SharedLedger) -> Self {
        Self {
            inner,
            evaluation_failures: Arc::default(),
            gone_on_action: Arc::default(),
            rate_limit: None,
            log_visible_to: None,
        }
    }

    fn fail_evaluations(&self, account: AccountId, times: u32) {
        self.evaluation_failures.lock().unwrap().insert(account, times);
    }

    fn lose_race(&self, account: AccountId) {
        self.gone_on_action.lock().unwrap().insert(account);
    }

    fn take_failure(&self, account: AccountId) -> Option<GatewayError> {
        let mut failures = self.evaluation_failures.lock().unwrap();
        let left = failures.get_mut(&account)?;
        if *left == 0 {
            return None;
        }
        *left -= 1;
        Some(match self.rate_limit {
            Some(after) => GatewayError::RateLimited {
                retry_after: Some(after),
            },
            None => GatewayError::Transient("connection reset".to_string()),
        })
    }
}

#[async_trait]
impl LedgerGateway for FlakyGateway {
    async fn head(&self) -> Result<u64, GatewayError> {
        LedgerGateway::head(&self.inner).await
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<Event>, GatewayError> {
        match self.log_visible_to {
            // a lagging node answers with the tail it has, not the range asked for
            Some(visible) if to > visible => LedgerGateway::events(&self.inner, 1, visible).await,
            _ => LedgerGateway::events(&self.inner, from, to).await,
        }
    }

    async fn can_liquidate(&self, account: AccountId) -> Result<bool, GatewayError> {
        if let Some(e) = self.take_failure(account) {
            return Err(e);
        }
        LedgerGateway::can_liquidate(&self.inner, account).await
    }

    async fn should_close(&self, account: AccountId) -> Result<StopCheck, GatewayError> {
        LedgerGateway::should_close(&self.inner, account).await
    }

    async fn estimate_payout(&self, action: KeeperAction) -> Result<Amount, GatewayError> {
        LedgerGateway::estimate_payout(&self.inner, action).await
    }

    async fn pool_balance(&self) -> Result<Amount, GatewayError> {
        LedgerGateway::pool_balance(&self.inner).await
    }

    async fn liquidate(&self, caller: AccountId, account: AccountId) -> Result<u64, GatewayError> {
        if self.gone_on_action.lock().unwrap().contains(&account) {
            return Err(GatewayError::Rejected(LedgerError::NoOpenPosition(account)));
        }
        LedgerGateway::liquidate(&self.inner, caller, account).await
    }

    async fn close_if_triggered(&self, caller: AccountId, account: AccountId) -> Result<u64, GatewayError> {
        LedgerGateway::close_if_triggered(&self.inner, caller, account).await
    }
}

mod scanning {
    use super::*;

    #[tokio::test]
    async fn open_set_matches_ledger_positions() {
        let mut m = Market::new(100, 100 * ONE);
        m.open_longs(1..=5, 3).await;
        m.ledger.close(AccountId(2)).await.unwrap();
        m.ledger
            .set_stops(AccountId(3), StopUpdate::Keep, StopUpdate::Set(Price::from_units(120)))
            .await
            .unwrap();
        m.set_index(121);
        m.ledger.close_if_triggered(AccountId(42), AccountId(3)).await.unwrap();

        let mut keeper = Keeper::new(m.ledger.clone(), config(5));
        let report = keeper.run_cycle().await;

        let ledger = m.ledger.lock().await;
        let held: Vec<AccountId> = {
            let mut ids: Vec<AccountId> = ledger.positions_iter().map(|(id, _)| *id).collect();
            ids.sort();
            ids
        };
        let tracked: Vec<AccountId> = keeper.open_set().iter().collect();

        assert_eq!(report.scanned_events, ledger.events().len());
        assert_eq!(tracked, held);
        assert_eq!(tracked, vec![AccountId(1), AccountId(4), AccountId(5)]);
        assert_eq!(keeper.open_set().cursor(), ledger.head());
        assert_eq!(OpenSet::replay(ledger.events()), keeper.open_set().clone());
    }

    #[tokio::test]
    async fn lagging_event_log_ends_the_scan() {
        let m = Market::new(100, 100 * ONE);
        m.open_longs(1..=5, 2).await;

        let mut gateway = FlakyGateway::new(m.ledger.clone());
        gateway.log_visible_to = Some(2);
        let mut keeper = Keeper::new(gateway, config(5));

        // head is 5 but the second chunk only repeats seqs 1 and 2
        let report = keeper.run_cycle().await;
        assert_eq!(report.scanned_events, 2);
        assert_eq!(report.evaluated, 2);
        assert_eq!(keeper.open_set().cursor(), 2);
        assert_eq!(keeper.open_set().len(), 2);
    }

    #[tokio::test]
    async fn nothing_to_do_when_all_safe() {
        let m = Market::new(100, 100 * ONE);
        m.open_longs(1..=3, 2).await;

        let mut keeper = Keeper::new(m.ledger.clone(), config(5));
        let report = keeper.run_cycle().await;

        assert_eq!(report.evaluated, 3);
        assert_eq!(report.executed, 0);
        assert_eq!(keeper.open_set().len(), 3);
        assert_eq!(keeper.pending().count(), 0);
    }
}

mod actions {
    use super::*;

    #[tokio::test]
    async fn liquidations_are_capped_and_carried_over() {
        let mut m = Market::new(100, 100 * ONE);
        m.open_longs(1..=5, 20).await;
        m.set_index(96);

        let mut keeper = Keeper::new(m.ledger.clone(), config(2));

        let first = keeper.run_cycle().await;
        assert_eq!(first.executed, 2);
        assert_eq!(first.carried_over, 3);
        assert_eq!(keeper.pending().count(), 3);

        let second = keeper.run_cycle().await;
        assert_eq!(second.executed, 2);
        assert_eq!(second.carried_over, 1);

        let third = keeper.run_cycle().await;
        assert_eq!(third.executed, 1);
        assert_eq!(third.carried_over, 0);

        assert!(keeper.open_set().is_empty());
        let ledger = m.ledger.lock().await;
        assert_eq!(ledger.open_interest(), 0);
        // 20x long at 100 -> 96: equity 0.196, reward capped at 0.5% of 19.6 notional
        assert_eq!(ledger.credit_of(KEEPER), Amount::new(5 * 9_800_000));
    }

    #[tokio::test]
    async fn triggered_stop_is_closed_for_the_owner() {
        let mut m = Market::new(60, 100 * ONE);
        m.ledger
            .open(AccountId(7), Side::Short, 5, Amount::new(ONE))
            .await
            .unwrap();
        m.ledger
            .set_stops(
                AccountId(7),
                StopUpdate::Set(Price::from_units(65)),
                StopUpdate::Set(Price::from_units(50)),
            )
            .await
            .unwrap();

        let mut keeper = Keeper::new(m.ledger.clone(), config(5));
        assert_eq!(keeper.run_cycle().await.executed, 0);

        m.set_index(50);
        let report = keeper.run_cycle().await;
        assert_eq!(report.executed, 1);

        let ledger = m.ledger.lock().await;
        assert!(!ledger.has_open_position(AccountId(7)));
        assert!(ledger.credit_of(AccountId(7)).is_positive());
        assert_eq!(ledger.credit_of(KEEPER), Amount::zero());
        assert!(matches!(
            ledger.events().last().map(|e| &e.payload),
            Some(EventPayload::StopClosed(e)) if e.closer == KEEPER && e.hit_take_profit
        ));
    }

    #[tokio::test]
    async fn unpayable_close_is_skipped() {
        // unfunded pool: only the trader's own deposit backs the position
        let mut m = Market::new(60, 0);
        m.ledger
            .open(AccountId(1), Side::Long, 10, Amount::new(ONE))
            .await
            .unwrap();
        m.ledger
            .set_stops(AccountId(1), StopUpdate::Keep, StopUpdate::Set(Price::from_units(66)))
            .await
            .unwrap();
        m.set_index(66);

        let mut keeper = Keeper::new(m.ledger.clone(), config(5));
        let report = keeper.run_cycle().await;

        assert_eq!(report.skipped_unpayable, 1);
        assert_eq!(report.executed, 0);
        assert!(keeper.open_set().contains(AccountId(1)));
        assert!(m.ledger.lock().await.has_open_position(AccountId(1)));
    }
}

mod failures {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn failing_account_backs_off_and_stays_tracked() {
        let mut m = Market::new(100, 100 * ONE);
        m.open_longs(1..=2, 20).await;
        m.set_index(96);

        let gateway = FlakyGateway::new(m.ledger.clone());
        gateway.fail_evaluations(AccountId(1), 2);
        let mut keeper = Keeper::new(gateway, config(5));

        let first = keeper.run_cycle().await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.executed, 1);
        assert!(keeper.open_set().contains(AccountId(1)));
        assert!(keeper.is_backing_off(AccountId(1)));

        // still inside the 5s window: not even evaluated
        tokio::time::advance(Duration::from_secs(3)).await;
        let skipped = keeper.run_cycle().await;
        assert_eq!(skipped.evaluated, 0);

        // second failure doubles the delay to 10s
        tokio::time::advance(Duration::from_secs(3)).await;
        let again = keeper.run_cycle().await;
        assert_eq!(again.failed, 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(keeper.is_backing_off(AccountId(1)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!keeper.is_backing_off(AccountId(1)));
        let last = keeper.run_cycle().await;
        assert_eq!(last.executed, 1);
        assert!(keeper.open_set().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_honors_retry_after() {
        let mut m = Market::new(100, 100 * ONE);
        m.open_longs(1..=1, 20).await;
        m.set_index(96);

        let mut gateway = FlakyGateway::new(m.ledger.clone());
        gateway.rate_limit = Some(Duration::from_secs(60));
        gateway.fail_evaluations(AccountId(1), 1);
        let mut keeper = Keeper::new(gateway, config(5));

        assert_eq!(keeper.run_cycle().await.failed, 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(keeper.is_backing_off(AccountId(1)));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!keeper.is_backing_off(AccountId(1)));
        assert_eq!(keeper.run_cycle().await.executed, 1);
    }

    #[tokio::test]
    async fn position_gone_is_forgotten() {
        let mut m = Market::new(100, 100 * ONE);
        m.open_longs(1..=2, 20).await;
        m.set_index(96);

        let gateway = FlakyGateway::new(m.ledger.clone());
        gateway.lose_race(AccountId(2));
        let mut keeper = Keeper::new(gateway, config(5));

        let report = keeper.run_cycle().await;
        assert_eq!(report.executed, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);
        assert!(keeper.open_set().is_empty());
        assert!(!keeper.is_backing_off(AccountId(2)));
    }
}
