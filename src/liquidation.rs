//! Liquidation conditions and the liquidator reward.
//!
//! A position becomes liquidatable once its equity (margin + unrealized pnl) is at
//! or below the maintenance requirement, a fixed fraction of notional. Whoever
//! liquidates it is paid out of the remaining equity, capped at the liquidation
//! fee; equity above the cap stays with the pool.

use crate::position::Position;
use crate::types::{Amount, Bps, Overflow, Price};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Safe {
        equity: Amount,
        maintenance: Amount,
    },
    Liquidatable {
        equity: Amount,
        maintenance: Amount,
        shortfall: Amount,
    },
    // equity below zero: the pool eats the difference
    Bankrupt {
        bad_debt: Amount,
        maintenance: Amount,
    },
}

impl LiquidationStatus {
    pub fn is_liquidatable(&self) -> bool {
        !matches!(self, LiquidationStatus::Safe { .. })
    }
}

/// `equity <= maintenance` decides it; equal counts as liquidatable.
pub fn evaluate_liquidation(
    position: &Position,
    index: Price,
    maintenance_margin: Bps,
) -> Result<LiquidationStatus, Overflow> {
    let equity = position.equity(index)?;
    let maintenance = position.maintenance_requirement(maintenance_margin)?;

    if equity.is_negative() {
        return Ok(LiquidationStatus::Bankrupt {
            bad_debt: equity.negate(),
            maintenance,
        });
    }

    if equity <= maintenance {
        return Ok(LiquidationStatus::Liquidatable {
            equity,
            maintenance,
            shortfall: maintenance.checked_sub(equity)?,
        });
    }

    Ok(LiquidationStatus::Safe {
        equity,
        maintenance,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationPayout {
    pub equity: Amount,
    pub reward: Amount,
    // positive equity the pool keeps after paying the liquidator
    pub retained: Amount,
}

/// reward = min(max(equity, 0), notional * fee)
pub fn calculate_liquidation_payout(
    equity: Amount,
    notional: Amount,
    liquidation_fee: Bps,
) -> Result<LiquidationPayout, Overflow> {
    let cap = liquidation_fee.of(notional)?;
    let available = equity.floor_zero();
    let reward = available.min(cap);

    Ok(LiquidationPayout {
        equity,
        reward,
        retained: available.checked_sub(reward)?,
    })
}

/// Index value at which a position reaches its maintenance requirement.
///
/// Solves `margin + notional * (p - entry) / entry = maintenance` for `p`. Shorts
/// mirror it. Returns `None` when the position can never be liquidated by price
/// alone (a long whose margin covers the whole notional move to zero).
pub fn liquidation_price(position: &Position, maintenance_margin: Bps) -> Result<Option<Price>, Overflow> {
    let notional = position.notional()?;
    if notional.value() == 0 {
        return Ok(None);
    }
    let maintenance = position.maintenance_requirement(maintenance_margin)?;
    let cushion = position.margin.checked_sub(maintenance)?;
    let entry = position.entry_price.raw();
    let move_raw = crate::types::mul_div(cushion.value(), entry, notional.value())?;

    let raw = if position.is_long() {
        entry - move_raw
    } else {
        entry + move_raw
    };

    Ok(Price::from_raw(raw).filter(|p| !p.is_zero()))
}
