//! OHLC candle builder.
//!
//! Buckets index ticks into fixed-width candles aligned to the epoch. After
//! bucketing, every candle's open is forced to the previous candle's close so the
//! chart has no gaps between bars; high and low widen to cover the new open.
//! Pure: the same ticks always produce the same candles.

use crate::types::{Price, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
    D3,
    W1,
}

impl Timeframe {
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 4 * 3_600,
            Timeframe::D1 => 86_400,
            Timeframe::D3 => 3 * 86_400,
            Timeframe::W1 => 7 * 86_400,
        }
    }

    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::D3,
            Timeframe::W1,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
        }
    }

    /// Floor a timestamp to this timeframe's boundary. Works for negative times too.
    pub fn align_to_boundary(&self, timestamp: Timestamp) -> Timestamp {
        Timestamp::from_secs(bucket_start(timestamp.as_secs(), self.seconds()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::all()
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| CandleError::UnknownTimeframe(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandleError {
    #[error("unknown timeframe {0:?}, expected one of 1m 5m 15m 1h 4h 1d 3d 1w")]
    UnknownTimeframe(String),

    #[error("bucket width must be positive")]
    ZeroBucket,
}

/// A single OHLC candle. `time` is the bucket start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub time: Timestamp,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

impl Candle {
    fn new(time: Timestamp, value: Price) -> Self {
        Self {
            time,
            open: value,
            high: value,
            low: value,
            close: value,
        }
    }

    fn update(&mut self, value: Price) {
        self.high = self.high.max(value);
        self.low = self.low.min(value);
        self.close = value;
    }

    /// `low <= open, close <= high`
    pub fn is_valid(&self) -> bool {
        self.low <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
    }
}

fn bucket_start(secs: i64, width: i64) -> i64 {
    secs.div_euclid(width) * width
}

/// Builds candles from `(time, value)` points.
pub fn aggregate(points: &[(Timestamp, Price)], bucket_seconds: i64) -> Result<Vec<Candle>, CandleError> {
    if bucket_seconds <= 0 {
        return Err(CandleError::ZeroBucket);
    }

    // stable: equal timestamps keep their arrival order
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|(time, _)| *time);

    let mut candles: Vec<Candle> = Vec::new();
    for (time, value) in sorted {
        let start = Timestamp::from_secs(bucket_start(time.as_secs(), bucket_seconds));
        match candles.last_mut() {
            Some(candle) if candle.time == start => candle.update(value),
            _ => candles.push(Candle::new(start, value)),
        }
    }

    // continuity pass
    for i in 1..candles.len() {
        let prev_close = candles[i - 1].close;
        let candle = &mut candles[i];
        candle.open = prev_close;
        candle.high = candle.high.max(prev_close);
        candle.low = candle.low.min(prev_close);
    }

    Ok(candles)
}

pub fn aggregate_timeframe(points: &[(Timestamp, Price)], timeframe: Timeframe) -> Vec<Candle> {
    // a timeframe width is never zero
    aggregate(points, timeframe.seconds()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(t: i64, v: i64) -> (Timestamp, Price) {
        (Timestamp::from_secs(t), Price::from_units(v))
    }

    fn ohlc(c: &Candle) -> (i64, Price, Price, Price, Price) {
        (c.time.as_secs(), c.open, c.high, c.low, c.close)
    }

    #[test]
    fn two_buckets_with_continuity() {
        let candles = aggregate(&[pt(0, 100), pt(30, 110), pt(61, 90)], 60).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(
            ohlc(&candles[0]),
            (0, Price::from_units(100), Price::from_units(110), Price::from_units(100), Price::from_units(110))
        );
        assert_eq!(
            ohlc(&candles[1]),
            (60, Price::from_units(110), Price::from_units(110), Price::from_units(90), Price::from_units(90))
        );
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let sorted = aggregate(&[pt(0, 100), pt(30, 110), pt(61, 90)], 60).unwrap();
        let shuffled = aggregate(&[pt(61, 90), pt(0, 100), pt(30, 110)], 60).unwrap();
        assert_eq!(sorted, shuffled);
    }

    #[test]
    fn negative_times_floor_down() {
        let candles = aggregate(&[pt(-1, 5), pt(0, 6)], 60).unwrap();
        assert_eq!(candles[0].time, Timestamp::from_secs(-60));
        assert_eq!(candles[1].time, Timestamp::from_secs(0));
    }

    #[test]
    fn empty_and_zero_width() {
        assert!(aggregate(&[], 60).unwrap().is_empty());
        assert_eq!(aggregate(&[pt(0, 1)], 0).unwrap_err(), CandleError::ZeroBucket);
    }

    #[test]
    fn gaps_are_not_filled() {
        let candles = aggregate(&[pt(0, 100), pt(600, 120)], 60).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].open, Price::from_units(100));
        assert_eq!(candles[1].low, Price::from_units(100));
    }

    #[test]
    fn timeframe_parsing() {
        assert_eq!("3d".parse::<Timeframe>().unwrap(), Timeframe::D3);
        assert_eq!("1w".parse::<Timeframe>().unwrap().seconds(), 604_800);
        assert!(matches!("2h".parse::<Timeframe>(), Err(CandleError::UnknownTimeframe(_))));
        for tf in Timeframe::all() {
            assert_eq!(tf.to_string().parse::<Timeframe>().unwrap(), *tf);
        }
    }

    #[test]
    fn boundary_alignment() {
        assert_eq!(Timeframe::H1.align_to_boundary(Timestamp::from_secs(7_199)), Timestamp::from_secs(3_600));
    }
}
