// 1.0: all the primitives live here. ids, index prices, collateral amounts, leverage, timestamps.
// money and price are i128 fixed point so every division truncates the same way everywhere.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Index values carry 8 decimal places.
pub const PRICE_DECIMALS: u32 = 8;
pub const PRICE_SCALE: i128 = 100_000_000;
pub const BPS_DENOMINATOR: i128 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(pub String);

impl MarketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    // markets arriving over http are namespaced by chain
    pub fn qualified(chain: &str, market: &str) -> Self {
        Self(format!("{}:{}", chain.trim(), market.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// Long = profit when the index goes up. Short = profit when it goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> i128 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Side::Long)
    }
}

// 1.1: checked fixed point helpers. a * b / d, truncating toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fixed point arithmetic overflow")]
pub struct Overflow;

pub fn mul_div(a: i128, b: i128, denominator: i128) -> Result<i128, Overflow> {
    a.checked_mul(b)
        .and_then(|product| product.checked_div(denominator))
        .ok_or(Overflow)
}

// 1.2: index value, 8 decimals. never negative; zero is legal for percentage markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "Decimal", try_from = "Decimal")]
pub struct Price(i128);

impl Price {
    pub const ZERO: Price = Price(0);

    #[must_use]
    pub fn from_raw(raw: i128) -> Option<Self> {
        if raw >= 0 {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn from_raw_unchecked(raw: i128) -> Self {
        Self(raw)
    }

    // whole index units, e.g. from_units(60) == 60.00000000
    pub const fn from_units(units: i64) -> Self {
        Self(units as i128 * PRICE_SCALE)
    }

    /// Converts a decimal index value, truncating digits past the eighth.
    #[must_use]
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return None;
        }
        let scaled = value.checked_mul(Decimal::from(PRICE_SCALE as i64))?.trunc();
        scaled.to_i128().map(Self)
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::try_from_i128_with_scale(self.0, PRICE_DECIMALS).unwrap_or(Decimal::MAX)
    }

    pub fn raw(&self) -> i128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn abs_diff(&self, other: Price) -> i128 {
        (self.0 - other.0).abs()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.to_decimal()
    }
}

impl TryFrom<Decimal> for Price {
    type Error = String;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Price::from_decimal(value).ok_or_else(|| format!("invalid index value {value}"))
    }
}

// 1.3: collateral amount in native base units. margin, pnl, fees, payouts all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i128);

impl Amount {
    pub const fn new(value: i128) -> Self {
        Self(value)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> i128 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(&self, other: Amount) -> Result<Self, Overflow> {
        self.0.checked_add(other.0).map(Self).ok_or(Overflow)
    }

    pub fn checked_sub(&self, other: Amount) -> Result<Self, Overflow> {
        self.0.checked_sub(other.0).map(Self).ok_or(Overflow)
    }

    pub fn negate(&self) -> Self {
        Self(-self.0)
    }

    // settlement and rewards never go below zero
    pub fn floor_zero(&self) -> Self {
        Self(self.0.max(0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, a| Self(acc.0 + a.0))
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, a| Self(acc.0 + a.0))
    }
}

// 1.4: leverage multiplier. whole numbers only, >= 1x. the upper bound is a ledger setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Leverage(u32);

impl Leverage {
    #[must_use]
    pub fn new(value: u32) -> Option<Self> {
        if value >= 1 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn notional(&self, margin: Amount) -> Result<Amount, Overflow> {
        margin.0.checked_mul(self.0 as i128).map(Amount).ok_or(Overflow)
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// 1.5: basis points. 100 bps = 1%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bps(u32);

impl Bps {
    pub const fn new(bps: u32) -> Self {
        Self(bps)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    // amount * bps / 10000, truncated
    pub fn of(&self, amount: Amount) -> Result<Amount, Overflow> {
        mul_div(amount.0, self.0 as i128, BPS_DENOMINATOR).map(Amount)
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4)
    }
}

const MILLIS_THRESHOLD: i64 = 100_000_000_000;

// 1.6: unix timestamp in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    // external sources send either seconds or milliseconds; anything past 1e11 is millis
    pub fn from_secs_or_millis(raw: i64) -> Self {
        if raw > MILLIS_THRESHOLD {
            Self(raw / 1_000)
        } else {
            Self(raw)
        }
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn seconds_since(&self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
