//! Property-based tests for the position math, candles and the aggregator.
//!
//! These tests verify invariants hold under random inputs.

use index_perps::index::{Aggregator, CombineMode, IndexStore, MarketSpec, PublisherId, Reading, ValueDomain};
use index_perps::*;
use proptest::prelude::*;

const ONE: i128 = 100_000_000;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Price> {
    (1i128..1_000_000i128).prop_map(|x| Price::from_raw_unchecked(x * 1_000_000)) // 0.01 to 10,000
}

fn deposit_strategy() -> impl Strategy<Value = Amount> {
    (1i128..10_000i128).prop_map(|x| Amount::new(x * ONE / 100)) // 0.01 to 100
}

fn leverage_strategy() -> impl Strategy<Value = u32> {
    1u32..=150u32
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

fn position(side: Side, leverage: u32, margin: Amount, entry: Price) -> Position {
    Position::new(
        AccountId(1),
        side,
        Leverage::new(leverage).unwrap(),
        margin,
        entry,
        Timestamp::from_secs(0),
    )
}

proptest! {
    /// Pnl is zero when the index is back at entry
    #[test]
    fn pnl_zero_at_entry(
        side in side_strategy(),
        leverage in leverage_strategy(),
        margin in deposit_strategy(),
        entry in price_strategy(),
    ) {
        let pos = position(side, leverage, margin, entry);
        prop_assert_eq!(pos.unrealized_pnl(entry).unwrap(), Amount::zero());
    }

    /// Longs gain when the index rises, shorts gain when it falls
    #[test]
    fn pnl_sign_follows_side(
        side in side_strategy(),
        leverage in leverage_strategy(),
        margin in deposit_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
    ) {
        let pos = position(side, leverage, margin, entry);
        let pnl = pos.unrealized_pnl(exit).unwrap();
        let up = exit > entry;
        let down = exit < entry;

        match side {
            Side::Long if up => prop_assert!(!pnl.is_negative()),
            Side::Long if down => prop_assert!(!pnl.is_positive()),
            Side::Short if up => prop_assert!(!pnl.is_positive()),
            Side::Short if down => prop_assert!(!pnl.is_negative()),
            _ => prop_assert_eq!(pnl, Amount::zero()),
        }
    }

    /// Long and short of the same size have opposite pnl
    #[test]
    fn pnl_is_antisymmetric(
        leverage in leverage_strategy(),
        margin in deposit_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
    ) {
        let long = position(Side::Long, leverage, margin, entry).unrealized_pnl(exit).unwrap();
        let short = position(Side::Short, leverage, margin, entry).unrealized_pnl(exit).unwrap();
        prop_assert_eq!(long.value(), -short.value());
    }

    /// Settlement never goes negative and the fee only comes out of remaining equity
    #[test]
    fn settlement_is_floored(
        side in side_strategy(),
        leverage in leverage_strategy(),
        margin in deposit_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
        fee_bps in 0u32..=100u32,
    ) {
        let pos = position(side, leverage, margin, entry);
        let s = pos.settle(exit, Bps::new(fee_bps)).unwrap();

        prop_assert!(!s.settlement.is_negative());
        prop_assert!(!s.fee_collected.is_negative());
        prop_assert!(s.fee_collected <= s.close_fee);
        prop_assert!(s.pool_outflow().unwrap() <= s.equity.floor_zero());
    }

    /// Liquidatable exactly when equity is at or below maintenance
    #[test]
    fn liquidation_matches_equity(
        side in side_strategy(),
        leverage in leverage_strategy(),
        margin in deposit_strategy(),
        entry in price_strategy(),
        index in price_strategy(),
        mm_bps in 1u32..2_000u32,
    ) {
        let pos = position(side, leverage, margin, entry);
        let mm = Bps::new(mm_bps);
        let status = evaluate_liquidation(&pos, index, mm).unwrap();

        let equity = pos.equity(index).unwrap();
        let maintenance = pos.maintenance_requirement(mm).unwrap();
        prop_assert_eq!(status.is_liquidatable(), equity <= maintenance);
    }

    /// Liquidator reward is capped by the fee and by what equity is left
    #[test]
    fn liquidation_reward_bounded(
        equity in -1_000i128 * ONE..1_000i128 * ONE,
        notional in 1i128..10_000i128 * ONE,
        fee_bps in 0u32..=500u32,
    ) {
        let fee = Bps::new(fee_bps);
        let payout = calculate_liquidation_payout(Amount::new(equity), Amount::new(notional), fee).unwrap();

        prop_assert!(!payout.reward.is_negative());
        prop_assert!(payout.reward <= fee.of(Amount::new(notional)).unwrap());
        prop_assert!(payout.reward <= Amount::new(equity).floor_zero());
        prop_assert_eq!(
            payout.reward.value() + payout.retained.value(),
            Amount::new(equity).floor_zero().value()
        );
    }

    /// Every candle is well formed and opens at the previous close
    #[test]
    fn candles_are_continuous(
        raw in proptest::collection::vec((0i64..100_000, 1i64..1_000), 1..200),
        bucket in 1i64..5_000,
    ) {
        let points: Vec<(Timestamp, Price)> = raw
            .iter()
            .map(|(t, v)| (Timestamp::from_secs(*t), Price::from_units(*v)))
            .collect();
        let candles = aggregate(&points, bucket).unwrap();

        prop_assert!(!candles.is_empty());
        for c in &candles {
            prop_assert!(c.is_valid());
            prop_assert_eq!(c.time.as_secs() % bucket, 0);
        }
        for pair in candles.windows(2) {
            prop_assert!(pair[0].time < pair[1].time);
            prop_assert_eq!(pair[1].open, pair[0].close);
        }
    }

    /// Feeding the same readings twice changes nothing the second time
    #[test]
    fn aggregator_replay_is_idempotent(
        deltas in proptest::collection::vec(-5i64..=5, 1..50),
    ) {
        let spec = MarketSpec {
            market: MarketId::new("prop:index"),
            domain: ValueDomain::Positive,
            mode: CombineMode::additive(Price::from_units(1)),
            initial: Price::from_units(10_000),
            continuity: false,
        };
        let readings: Vec<Reading> = deltas
            .iter()
            .enumerate()
            .map(|(i, d)| Reading::Delta {
                source: "prop".to_string(),
                event_id: i as u64 + 1,
                delta: *d,
                timestamp: Timestamp::from_secs(i as i64),
                meta: None,
            })
            .collect();

        let mut agg = Aggregator::new(spec, PublisherId::new("prop"), &AggregatorConfig::default());
        for r in &readings {
            agg.apply(r).unwrap();
        }
        let once = agg.working_value();
        for r in &readings {
            prop_assert_eq!(agg.apply(r).unwrap(), None);
        }
        prop_assert_eq!(agg.working_value(), once);

        let expected = 10_000 + deltas.iter().sum::<i64>();
        prop_assert_eq!(once, Price::from_units(expected));
    }

    /// Published ticks never go backwards in time
    #[test]
    fn store_rejects_older_ticks(
        times in proptest::collection::vec(0i64..1_000, 1..100),
    ) {
        let store = IndexStore::default();
        let market = MarketId::new("prop:store");
        store.register_market(&market, ValueDomain::Positive);
        let writer = PublisherId::new("prop");
        store.allow_publisher(&market, writer.clone()).unwrap();

        for t in &times {
            let tick = index_perps::index::Tick::new(
                market.clone(),
                Timestamp::from_secs(*t),
                Price::from_units(1),
                index_perps::index::TickKind::Event,
            );
            let _ = store.publish(&writer, tick);
        }

        let ticks = store.ticks(&market);
        prop_assert!(!ticks.is_empty());
        for pair in ticks.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
