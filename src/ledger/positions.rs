//! Opening and closing positions, and the stop thresholds attached to them.

use super::core::Ledger;
use super::results::{CloseResult, LedgerError, OpenResult};
use crate::conditional::{StopCheck, StopLevels, StopUpdate, StopsError};
use crate::events::{EventPayload, PositionClosedEvent, PositionOpenedEvent, StopClosedEvent, StopsUpdatedEvent};
use crate::position::{opening_fee, Position, Settlement};
use crate::types::{AccountId, Amount, Leverage, Side};

impl Ledger {
    /// Opens a position at the current index value.
    ///
    /// The deposit joins the pool, the opening fee moves from the pool to the
    /// treasury, and the position keeps `deposit - fee` as margin.
    pub fn open(
        &mut self,
        account_id: AccountId,
        side: Side,
        leverage: u32,
        deposit: Amount,
    ) -> Result<OpenResult, LedgerError> {
        let max = self.config.max_leverage;
        let leverage = Leverage::new(leverage)
            .filter(|l| l.value() <= max)
            .ok_or(LedgerError::InvalidLeverage { requested: leverage, max })?;

        if !deposit.is_positive() {
            return Err(LedgerError::ZeroMargin);
        }
        if self.positions.contains_key(&account_id) {
            return Err(LedgerError::PositionAlreadyOpen(account_id));
        }

        let entry_price = self.index_price()?;
        if entry_price.is_zero() {
            return Err(LedgerError::ZeroIndexPrice(self.market_id.clone()));
        }

        let fee = opening_fee(deposit, leverage, self.config.taker_fee)?;
        let margin = deposit.checked_sub(fee)?;
        if !margin.is_positive() {
            return Err(LedgerError::ZeroMargin);
        }

        // fee is paid out of the pool once the deposit has landed in it
        let pool_after_deposit = self.pool.checked_add(deposit)?;
        if fee > pool_after_deposit {
            return Err(LedgerError::InsufficientFunds {
                needed: fee,
                available: pool_after_deposit,
            });
        }
        let treasury = self.treasury.checked_add(fee)?;

        self.pool = pool_after_deposit.checked_sub(fee)?;
        self.treasury = treasury;

        let now = self.time();
        let position = Position::new(account_id, side, leverage, margin, entry_price, now);
        self.positions.insert(account_id, position);

        let seq = self.emit_event(EventPayload::PositionOpened(PositionOpenedEvent {
            account_id,
            side,
            leverage,
            deposit,
            fee,
            margin,
            entry_price,
        }));

        Ok(OpenResult {
            account_id,
            entry_price,
            fee,
            margin,
            seq,
        })
    }

    /// Settlement `close` would produce right now. Does not touch any state.
    pub fn estimate_close(&self, account_id: AccountId) -> Result<Settlement, LedgerError> {
        let position = self.require_position(account_id)?;
        let exit_price = self.index_price()?;
        Ok(position.settle(exit_price, self.config.taker_fee)?)
    }

    pub fn close(&mut self, account_id: AccountId) -> Result<CloseResult, LedgerError> {
        let settlement = self.estimate_close(account_id)?;
        self.apply_settlement(account_id, &settlement)?;

        let seq = self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
            account_id,
            exit_price: settlement.exit_price,
            pnl: settlement.pnl,
            close_fee: settlement.fee_collected,
            settlement: settlement.settlement,
        }));

        Ok(CloseResult {
            account_id,
            settlement,
            stops: None,
            seq,
        })
    }

    pub fn set_stops(
        &mut self,
        account_id: AccountId,
        stop_loss: StopUpdate,
        take_profit: StopUpdate,
    ) -> Result<StopLevels, LedgerError> {
        let now = self.time();
        let position = self
            .positions
            .get_mut(&account_id)
            .ok_or(LedgerError::NoOpenPosition(account_id))?;

        let next = position.stops.updated(position.side, stop_loss, take_profit)?;
        position.stops = next;
        position.last_update = now;

        self.emit_event(EventPayload::StopsUpdated(StopsUpdatedEvent {
            account_id,
            stop_loss: next.stop_loss,
            take_profit: next.take_profit,
        }));

        Ok(next)
    }

    /// Raw thresholds: `None` keeps, `Some(0)` clears, a positive value sets.
    pub fn set_stops_raw(
        &mut self,
        account_id: AccountId,
        stop_loss: Option<i128>,
        take_profit: Option<i128>,
    ) -> Result<StopLevels, LedgerError> {
        let sl = StopUpdate::from_raw(stop_loss).ok_or(StopsError::NonPositive)?;
        let tp = StopUpdate::from_raw(take_profit).ok_or(StopsError::NonPositive)?;
        self.set_stops(account_id, sl, tp)
    }

    pub fn should_close(&self, account_id: AccountId) -> Result<StopCheck, LedgerError> {
        let Some(position) = self.positions.get(&account_id) else {
            return Ok(StopCheck::default());
        };
        if position.stops.is_empty() {
            return Ok(StopCheck::default());
        }
        let index = self.index_price()?;
        Ok(position.stops.check(position.side, index))
    }

    /// Anyone may call this once a stop has been crossed. The owner gets the settlement.
    pub fn close_if_triggered(
        &mut self,
        caller: AccountId,
        account_id: AccountId,
    ) -> Result<CloseResult, LedgerError> {
        self.require_position(account_id)?;
        let check = self.should_close(account_id)?;
        if !check.triggered {
            return Err(LedgerError::StopsNotTriggered(account_id));
        }

        let settlement = self.estimate_close(account_id)?;
        self.apply_settlement(account_id, &settlement)?;

        tracing::info!(
            market = %self.market_id,
            account = %account_id,
            %caller,
            exit = %settlement.exit_price,
            stop_loss = check.hit_stop_loss,
            take_profit = check.hit_take_profit,
            "stop close"
        );

        let seq = self.emit_event(EventPayload::StopClosed(StopClosedEvent {
            account_id,
            closer: caller,
            exit_price: settlement.exit_price,
            pnl: settlement.pnl,
            close_fee: settlement.fee_collected,
            settlement: settlement.settlement,
            hit_stop_loss: check.hit_stop_loss,
            hit_take_profit: check.hit_take_profit,
        }));

        Ok(CloseResult {
            account_id,
            settlement,
            stops: Some(check),
            seq,
        })
    }

    // 8.3: moves collateral for a close. checks everything before mutating anything.
    fn apply_settlement(&mut self, account_id: AccountId, settlement: &Settlement) -> Result<(), LedgerError> {
        let outflow = settlement.pool_outflow()?;
        self.require_pool(outflow)?;

        let pool = self.pool.checked_sub(outflow)?;
        let treasury = self.treasury.checked_add(settlement.fee_collected)?;
        self.credit(account_id, settlement.settlement)?;

        self.pool = pool;
        self.treasury = treasury;
        self.positions.remove(&account_id);
        Ok(())
    }
}
