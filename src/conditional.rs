//! Stop-loss and take-profit thresholds attached to a position.
//!
//! Thresholds are absolute index values. They live on the position itself and are
//! checked against the latest index value; anyone may close a position once one of
//! them has been crossed.

use crate::types::{Price, Side};
use serde::{Deserialize, Serialize};

/// How a trigger price is compared against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// Triggers when the index is at or above the threshold.
    Above,
    /// Triggers when the index is at or below the threshold.
    Below,
}

impl TriggerCondition {
    pub fn stop_loss(side: Side) -> Self {
        // stop loss fires when the index moves against the position
        match side {
            Side::Long => TriggerCondition::Below,
            Side::Short => TriggerCondition::Above,
        }
    }

    pub fn take_profit(side: Side) -> Self {
        match side {
            Side::Long => TriggerCondition::Above,
            Side::Short => TriggerCondition::Below,
        }
    }

    pub fn is_met(&self, index: Price, threshold: Price) -> bool {
        match self {
            TriggerCondition::Above => index >= threshold,
            TriggerCondition::Below => index <= threshold,
        }
    }
}

/// Thresholds currently set on a position. `None` means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLevels {
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
}

/// One side of a stops update.
///
/// `Keep` leaves the current threshold untouched, so a caller can move the
/// take-profit without restating the stop-loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopUpdate {
    Keep,
    Clear,
    Set(Price),
}

impl StopUpdate {
    /// Raw form used by external callers: absent keeps, zero clears, positive sets.
    pub fn from_raw(raw: Option<i128>) -> Option<Self> {
        match raw {
            None => Some(StopUpdate::Keep),
            Some(0) => Some(StopUpdate::Clear),
            Some(v) if v > 0 => Some(StopUpdate::Set(Price::from_raw_unchecked(v))),
            Some(_) => None,
        }
    }

    pub fn apply(&self, current: Option<Price>) -> Option<Price> {
        match self {
            StopUpdate::Keep => current,
            StopUpdate::Clear => None,
            StopUpdate::Set(price) => Some(*price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StopsError {
    #[error("stop loss {stop_loss} and take profit {take_profit} are on the wrong sides for a {side:?} position")]
    Crossed {
        side: Side,
        stop_loss: Price,
        take_profit: Price,
    },
    #[error("stop threshold must be a positive index value")]
    NonPositive,
}

impl StopLevels {
    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none()
    }

    /// Applies both sides of an update, rejecting thresholds that cross.
    pub fn updated(
        &self,
        side: Side,
        stop_loss: StopUpdate,
        take_profit: StopUpdate,
    ) -> Result<StopLevels, StopsError> {
        let next = StopLevels {
            stop_loss: stop_loss.apply(self.stop_loss),
            take_profit: take_profit.apply(self.take_profit),
        };

        if next.stop_loss.is_some_and(|p| p.is_zero()) || next.take_profit.is_some_and(|p| p.is_zero()) {
            return Err(StopsError::NonPositive);
        }

        if let (Some(sl), Some(tp)) = (next.stop_loss, next.take_profit) {
            let ordered = match side {
                Side::Long => sl < tp,
                Side::Short => sl > tp,
            };
            if !ordered {
                return Err(StopsError::Crossed {
                    side,
                    stop_loss: sl,
                    take_profit: tp,
                });
            }
        }

        Ok(next)
    }

    /// Evaluates both thresholds for a position on `side` at the given index value.
    pub fn check(&self, side: Side, index: Price) -> StopCheck {
        let hit_stop_loss = self
            .stop_loss
            .is_some_and(|sl| TriggerCondition::stop_loss(side).is_met(index, sl));
        let hit_take_profit = self
            .take_profit
            .is_some_and(|tp| TriggerCondition::take_profit(side).is_met(index, tp));

        StopCheck {
            triggered: hit_stop_loss || hit_take_profit,
            hit_stop_loss,
            hit_take_profit,
        }
    }
}

/// Result of `should_close`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCheck {
    pub triggered: bool,
    pub hit_stop_loss: bool,
    pub hit_take_profit: bool,
}
