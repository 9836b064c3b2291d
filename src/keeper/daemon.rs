// 10.3: the keeper loop. each cycle walks ScanWindow -> EvaluateOpenSet -> ActUpToCap,
// then sleeps. it only talks to the ledger through the gateway.

use super::gateway::{GatewayError, KeeperAction, LedgerGateway};
use super::open_set::OpenSet;
use crate::config::KeeperConfig;
use crate::types::AccountId;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperPhase {
    ScanWindow,
    EvaluateOpenSet,
    ActUpToCap,
    Sleep,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    failures: u32,
    until: Instant,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeeperReport {
    pub scanned_events: usize,
    pub evaluated: usize,
    pub executed: usize,
    pub skipped_unpayable: usize,
    pub failed: usize,
    pub removed: usize,
    pub carried_over: usize,
}

pub struct Keeper<G: LedgerGateway> {
    gateway: G,
    config: KeeperConfig,
    open_set: OpenSet,
    retry: HashMap<AccountId, RetryState>,
    // eligible last cycle but over the action cap; served first
    carry_over: VecDeque<KeeperAction>,
    last_scan: Option<Instant>,
    phase: KeeperPhase,
}

impl<G: LedgerGateway> Keeper<G> {
    pub fn new(gateway: G, config: KeeperConfig) -> Self {
        Self {
            gateway,
            config,
            open_set: OpenSet::new(),
            retry: HashMap::new(),
            carry_over: VecDeque::new(),
            last_scan: None,
            phase: KeeperPhase::Sleep,
        }
    }

    pub fn open_set(&self) -> &OpenSet {
        &self.open_set
    }

    pub fn phase(&self) -> KeeperPhase {
        self.phase
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn is_backing_off(&self, account: AccountId) -> bool {
        self.retry
            .get(&account)
            .is_some_and(|r| r.until > Instant::now())
    }

    pub fn pending(&self) -> impl Iterator<Item = &KeeperAction> {
        self.carry_over.iter()
    }

    pub async fn run_cycle(&mut self) -> KeeperReport {
        let mut report = KeeperReport::default();

        self.phase = KeeperPhase::ScanWindow;
        let scan_due = self
            .last_scan
            .map_or(true, |at| at.elapsed() >= self.config.scan_interval);
        if scan_due {
            report.scanned_events = self.scan().await;
        }

        self.phase = KeeperPhase::EvaluateOpenSet;
        let queued = self.evaluate(&mut report).await;

        self.phase = KeeperPhase::ActUpToCap;
        self.act(queued, &mut report).await;

        self.phase = KeeperPhase::Sleep;
        report
    }

    // 10.4: pull events from the cursor to the head in chunks. a failed chunk stops the
    // scan; the cursor stays at the last fully applied event.
    async fn scan(&mut self) -> usize {
        let head = match self.gateway.head().await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!(error = %e, "keeper could not read ledger head");
                return 0;
            }
        };

        let chunk = self.config.scan_chunk.max(1);
        let mut applied = 0;
        while self.open_set.cursor() < head {
            let from = self.open_set.cursor() + 1;
            let to = (from + chunk - 1).min(head);
            match self.gateway.events(from, to).await {
                Ok(events) => {
                    // nothing past the cursor: the log lags its head, retry next scan
                    let fresh = self.open_set.apply_all(&events);
                    if fresh == 0 {
                        tracing::warn!(from, to, head, returned = events.len(), "keeper scan chunk brought no new events");
                        break;
                    }
                    applied += fresh;
                }
                Err(e) => {
                    tracing::warn!(from, to, error = %e, "keeper scan chunk failed");
                    return applied;
                }
            }
        }

        self.last_scan = Some(Instant::now());
        tracing::debug!(applied, cursor = self.open_set.cursor(), open = self.open_set.len(), "keeper scan done");
        applied
    }

    async fn evaluate(&mut self, report: &mut KeeperReport) -> VecDeque<KeeperAction> {
        let mut queue: VecDeque<KeeperAction> = VecDeque::new();
        let mut seen: HashSet<AccountId> = HashSet::new();

        // carry-over first, dropping accounts that have since left the open set
        while let Some(action) = self.carry_over.pop_front() {
            if self.open_set.contains(action.account()) && seen.insert(action.account()) {
                queue.push_back(action);
            }
        }

        let accounts: Vec<AccountId> = self.open_set.iter().collect();
        for account in accounts {
            if seen.contains(&account) || self.is_backing_off(account) {
                continue;
            }
            report.evaluated += 1;

            match self.classify(account).await {
                Ok(Some(action)) => {
                    self.retry.remove(&account);
                    seen.insert(account);
                    queue.push_back(action);
                }
                Ok(None) => {
                    self.retry.remove(&account);
                }
                Err(e) if e.is_position_gone() => {
                    self.forget(account);
                    report.removed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    self.back_off(account, &e);
                }
            }
        }

        queue
    }

    async fn classify(&self, account: AccountId) -> Result<Option<KeeperAction>, GatewayError> {
        if self.gateway.can_liquidate(account).await? {
            return Ok(Some(KeeperAction::Liquidate(account)));
        }
        if self.gateway.should_close(account).await?.triggered {
            return Ok(Some(KeeperAction::CloseTriggered(account)));
        }
        Ok(None)
    }

    async fn act(&mut self, mut queue: VecDeque<KeeperAction>, report: &mut KeeperReport) {
        let cap = self.config.max_actions_per_loop.max(1);
        let caller = self.config.keeper_account;
        let mut issued = 0;

        while issued < cap {
            let Some(action) = queue.pop_front() else {
                break;
            };
            let account = action.account();

            match self.affordable(action).await {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped_unpayable += 1;
                    continue;
                }
                Err(e) if e.is_position_gone() => {
                    self.forget(account);
                    report.removed += 1;
                    continue;
                }
                Err(e) => {
                    report.failed += 1;
                    self.back_off(account, &e);
                    continue;
                }
            }

            issued += 1;
            let result = match action {
                KeeperAction::Liquidate(_) => self.gateway.liquidate(caller, account).await,
                KeeperAction::CloseTriggered(_) => self.gateway.close_if_triggered(caller, account).await,
            };

            match result {
                Ok(seq) => {
                    tracing::info!(?action, seq, "keeper action executed");
                    report.executed += 1;
                    self.forget(account);
                }
                Err(e) if e.is_position_gone() => {
                    tracing::debug!(?action, "position already gone");
                    self.forget(account);
                    report.removed += 1;
                }
                Err(GatewayError::Rejected(e)) => {
                    // condition no longer holds (price moved back); re-evaluated next cycle
                    tracing::debug!(?action, error = %e, "keeper action rejected");
                }
                Err(e) => {
                    report.failed += 1;
                    self.back_off(account, &e);
                }
            }
        }

        report.carried_over = queue.len();
        if !queue.is_empty() {
            tracing::debug!(leftover = queue.len(), cap, "action cap reached, carrying over");
        }
        self.carry_over = queue;
    }

    // estimated payout must fit in the pool, otherwise the ledger would reject it anyway
    async fn affordable(&self, action: KeeperAction) -> Result<bool, GatewayError> {
        let payout = self.gateway.estimate_payout(action).await?;
        let pool = self.gateway.pool_balance().await?;
        if payout > pool {
            tracing::warn!(?action, %payout, %pool, "skipping action the pool cannot pay");
            return Ok(false);
        }
        Ok(true)
    }

    fn forget(&mut self, account: AccountId) {
        self.open_set.remove(account);
        self.retry.remove(&account);
    }

    fn back_off(&mut self, account: AccountId, error: &GatewayError) {
        let failures = self.retry.get(&account).map_or(1, |r| r.failures + 1);
        let exp = failures.saturating_sub(1).min(16);
        let mut delay = self
            .config
            .account_backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.config.account_backoff_max);
        if let GatewayError::RateLimited { retry_after: Some(after) } = error {
            delay = delay.max(*after).min(self.config.account_backoff_max);
        }
        tracing::warn!(%account, failures, ?delay, error = %error, "keeper backing off account");
        self.retry.insert(
            account,
            RetryState {
                failures,
                until: Instant::now() + delay,
            },
        );
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval = ?self.config.action_interval,
            scan_interval = ?self.config.scan_interval,
            max_actions = self.config.max_actions_per_loop,
            "keeper started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = self.run_cycle().await;
            if report.executed > 0 || report.failed > 0 {
                tracing::info!(?report, "keeper cycle");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.action_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(open = self.open_set.len(), "keeper stopped");
    }
}
