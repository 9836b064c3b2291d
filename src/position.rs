// 4.0: position record and the pnl math. pnl = notional * (exit - entry) / entry, sign flipped for shorts.
// 4.1 has the settlement breakdown used by close, stop close and liquidation.

use crate::conditional::StopLevels;
use crate::types::{AccountId, Amount, Bps, Leverage, Overflow, Price, Side, Timestamp, mul_div};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub side: Side,
    pub leverage: Leverage,
    // collateral net of the opening fee
    pub margin: Amount,
    pub entry_price: Price,
    pub opened_at: Timestamp,
    pub last_update: Timestamp,
    pub stops: StopLevels,
}

impl Position {
    pub fn new(
        account_id: AccountId,
        side: Side,
        leverage: Leverage,
        margin: Amount,
        entry_price: Price,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            account_id,
            side,
            leverage,
            margin,
            entry_price,
            opened_at: timestamp,
            last_update: timestamp,
            stops: StopLevels::default(),
        }
    }

    pub fn is_long(&self) -> bool {
        self.side.is_long()
    }

    pub fn notional(&self) -> Result<Amount, Overflow> {
        self.leverage.notional(self.margin)
    }

    pub fn unrealized_pnl(&self, price: Price) -> Result<Amount, Overflow> {
        calculate_pnl(self.side, self.notional()?, self.entry_price, price)
    }

    // 4.2: margin + pnl. compared against maintenance to decide liquidation
    pub fn equity(&self, price: Price) -> Result<Amount, Overflow> {
        self.margin.checked_add(self.unrealized_pnl(price)?)
    }

    pub fn maintenance_requirement(&self, maintenance_margin: Bps) -> Result<Amount, Overflow> {
        maintenance_margin.of(self.notional()?)
    }

    pub fn settle(&self, exit_price: Price, taker_fee: Bps) -> Result<Settlement, Overflow> {
        let notional = self.notional()?;
        let pnl = calculate_pnl(self.side, notional, self.entry_price, exit_price)?;
        let equity = self.margin.checked_add(pnl)?;
        let close_fee = taker_fee.of(notional)?;

        // fee can only come out of what the position still owns
        let fee_collected = close_fee.min(equity.floor_zero());
        let settlement = equity.checked_sub(close_fee)?.floor_zero();

        Ok(Settlement {
            exit_price,
            notional,
            pnl,
            equity,
            close_fee,
            fee_collected,
            settlement,
        })
    }
}

// 4.3: the linear index pnl formula. entry of zero cannot happen for an open position.
pub fn calculate_pnl(
    side: Side,
    notional: Amount,
    entry_price: Price,
    exit_price: Price,
) -> Result<Amount, Overflow> {
    let move_raw = exit_price.raw() - entry_price.raw();
    let pnl = mul_div(notional.value(), move_raw, entry_price.raw())?;
    Ok(Amount::new(side.sign() * pnl))
}

pub fn opening_fee(deposit: Amount, leverage: Leverage, taker_fee: Bps) -> Result<Amount, Overflow> {
    taker_fee.of(leverage.notional(deposit)?)
}

// 4.1: everything close needs to move collateral around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub exit_price: Price,
    pub notional: Amount,
    pub pnl: Amount,
    pub equity: Amount,
    pub close_fee: Amount,
    pub fee_collected: Amount,
    // paid to the position owner, floored at zero
    pub settlement: Amount,
}

impl Settlement {
    // pool outflow when the position is closed normally
    pub fn pool_outflow(&self) -> Result<Amount, Overflow> {
        self.settlement.checked_add(self.fee_collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: i128 = 100_000_000; // 1.0 collateral in 8-decimal base units

    fn long_at(entry: i64) -> Position {
        Position::new(
            AccountId(1),
            Side::Long,
            Leverage::new(10).unwrap(),
            Amount::new(ONE),
            Price::from_units(entry),
            Timestamp::from_secs(0),
        )
    }

    #[test]
    fn pnl_long_profit() {
        let pos = long_at(60);
        // notional 10.0, index +10% -> +1.0
        assert_eq!(pos.unrealized_pnl(Price::from_units(66)).unwrap(), Amount::new(ONE));
    }

    #[test]
    fn pnl_long_loss() {
        let pos = long_at(60);
        assert_eq!(pos.unrealized_pnl(Price::from_units(54)).unwrap(), Amount::new(-ONE));
    }

    #[test]
    fn pnl_short_mirrors_long() {
        let mut pos = long_at(60);
        pos.side = Side::Short;
        assert_eq!(pos.unrealized_pnl(Price::from_units(54)).unwrap(), Amount::new(ONE));
        assert_eq!(pos.unrealized_pnl(Price::from_units(60)).unwrap(), Amount::zero());
    }

    #[test]
    fn pnl_truncates_toward_zero() {
        // 10 * (61 - 60) / 60 = 0.1666.. -> 16_666_666 base units, both signs
        let notional = Amount::new(10 * ONE);
        let up = calculate_pnl(Side::Long, notional, Price::from_units(60), Price::from_units(61)).unwrap();
        let down = calculate_pnl(Side::Short, notional, Price::from_units(60), Price::from_units(61)).unwrap();
        assert_eq!(up, Amount::new(16_666_666));
        assert_eq!(down, Amount::new(-16_666_666));
    }

    #[test]
    fn equity_and_maintenance() {
        let pos = long_at(60);
        assert_eq!(pos.equity(Price::from_units(66)).unwrap(), Amount::new(2 * ONE));
        // 6.25% of notional 10.0
        assert_eq!(pos.maintenance_requirement(Bps::new(625)).unwrap(), Amount::new(62_500_000));
    }

    #[test]
    fn settlement_with_fee() {
        let pos = long_at(60);
        let s = pos.settle(Price::from_units(66), Bps::new(10)).unwrap();
        assert_eq!(s.notional, Amount::new(10 * ONE));
        assert_eq!(s.close_fee, Amount::new(1_000_000)); // 0.1% of 10.0
        assert_eq!(s.settlement, Amount::new(2 * ONE - 1_000_000));
        assert_eq!(s.pool_outflow().unwrap(), Amount::new(2 * ONE));
    }

    #[test]
    fn settlement_floors_at_zero() {
        let pos = long_at(60);
        // index halves: pnl = -5.0 against 1.0 margin
        let s = pos.settle(Price::from_units(30), Bps::new(10)).unwrap();
        assert!(s.equity.is_negative());
        assert_eq!(s.settlement, Amount::zero());
        assert_eq!(s.fee_collected, Amount::zero());
    }

    #[test]
    fn opening_fee_exact() {
        let fee = opening_fee(Amount::new(ONE), Leverage::new(10).unwrap(), Bps::new(10)).unwrap();
        assert_eq!(fee, Amount::new(1_000_000));
    }
}
