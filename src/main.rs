//! index-perps service binary.
//!
//! `serve` runs the http api, the index aggregator for the ledger market and the
//! keeper. `simulate` walks a few deterministic scenarios in-process. `backfill`
//! replays a JSON-lines history file into a store and prints what it built.

use anyhow::Context;
use clap::{Parser, Subcommand};
use index_perps::api::{self, AppState};
use index_perps::index::backfill::{Backfill, VecHistory};
use index_perps::index::feed::{HttpFeed, RandomWalkFeed};
use index_perps::index::{
    Aggregator, AggregatorDaemon, CombineMode, FeedSource, IndexStore, MarketSpec, PublisherId, Reading, Tick,
    TickKind, ValueDomain,
};
use index_perps::keeper::Keeper;
use index_perps::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "index-perps", version, about = "Leveraged positions on synthetic indexes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the http api, the ledger market aggregator and the keeper
    Serve,
    /// Run the built-in scenarios and print what happens
    Simulate,
    /// Load a JSON-lines history file into a fresh store
    Backfill {
        /// Market id as chain:market
        #[arg(long)]
        market: String,
        #[arg(long)]
        file: PathBuf,
        /// Treat the market as a 0-100 percentage index
        #[arg(long)]
        percentage: bool,
        /// Candle timeframe to summarize with
        #[arg(long, default_value = "1h")]
        tf: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "index_perps=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => serve().await,
        Command::Simulate => simulate().await,
        Command::Backfill {
            market,
            file,
            percentage,
            tf,
        } => backfill(market, file, percentage, tf).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    if config.server.ingest_secret.is_none() {
        return Err(ConfigError::Missing("INGEST_SECRET").into());
    }

    let store = Arc::new(IndexStore::new(config.server.max_ticks, config.server.max_events));
    for market in &config.server.percentage_markets {
        store.register_market(market, ValueDomain::Percentage);
    }

    let ledger_market = config.server.ledger_market.clone();
    let (spec, feed): (MarketSpec, Box<dyn FeedSource>) = match &config.server.feed_url {
        Some(url) => (
            MarketSpec {
                market: ledger_market.clone(),
                domain: ValueDomain::Positive,
                mode: CombineMode::additive(Price::from_units(1)),
                initial: Price::from_units(10_000),
                continuity: true,
            },
            Box::new(HttpFeed::new(url.clone())?),
        ),
        None => (
            MarketSpec {
                market: ledger_market.clone(),
                domain: ValueDomain::Positive,
                mode: CombineMode::Absolute {
                    min: Price::from_units(10),
                    max: Price::from_units(1_000),
                },
                initial: Price::from_units(100),
                continuity: true,
            },
            Box::new(RandomWalkFeed::new(
                Timestamp::now().as_secs() as u64,
                Price::from_units(100),
                Price::from_units(10),
                Price::from_units(1_000),
                Price::from_units(1),
            )),
        ),
    };

    let aggregator = Aggregator::new(spec, PublisherId::new("aggregator"), &config.aggregator);
    let daemon = AggregatorDaemon::new(aggregator, feed, store.clone(), &config.aggregator)
        .context("failed to attach aggregator to the index store")?;

    let ledger = SharedLedger::new(Ledger::new(ledger_market.clone(), config.ledger.clone(), store.clone()));
    let keeper = Keeper::new(ledger.clone(), config.keeper.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let aggregator_task = tokio::spawn(daemon.run(shutdown_rx.clone()));
    let keeper_task = tokio::spawn(keeper.run(shutdown_rx));

    let state = AppState {
        config: Arc::new(config.server.clone()),
        store,
        ledger,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, market = %ledger_market, "index-perps listening");

    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown requested");
        })
        .await?;

    shutdown_tx.send(true).ok();
    aggregator_task.await?;
    keeper_task.await?;
    tracing::info!("index-perps stopped");
    Ok(())
}

async fn backfill(market: String, file: PathBuf, percentage: bool, tf: String) -> anyhow::Result<()> {
    let timeframe: Timeframe = tf.parse()?;
    let market = match market.split_once(':') {
        Some((chain, name)) => MarketId::qualified(chain, name),
        None => anyhow::bail!("market must look like chain:market, got {market}"),
    };
    let domain = if percentage {
        ValueDomain::Percentage
    } else {
        ValueDomain::Positive
    };

    let mut history = VecHistory::from_jsonl_file(&file).await?;
    let Some((from, to)) = history.span() else {
        anyhow::bail!("{} contains no history", file.display());
    };

    let store = IndexStore::new(usize::MAX, index_perps::index::DEFAULT_MAX_EVENTS);
    let stats = Backfill::new(&store)
        .run(&mut history, &market, domain, from, to)
        .await?;
    let candles = aggregate_timeframe(&store.points(&market), timeframe);

    let summary = serde_json::json!({
        "market": market,
        "windows": stats.windows,
        "fetched": stats.fetched_points,
        "appended": stats.appended,
        "skipped": stats.skipped_existing,
        "rejected": stats.rejected,
        "tf": timeframe.as_str(),
        "candles": candles,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// simulations
// ---------------------------------------------------------------------------

const ONE: i128 = 100_000_000;

struct Sim {
    store: Arc<IndexStore>,
    market: MarketId,
    writer: PublisherId,
    clock: i64,
}

impl Sim {
    fn new(name: &str, domain: ValueDomain) -> anyhow::Result<Self> {
        let store = Arc::new(IndexStore::default());
        let market = MarketId::qualified("sim", name);
        store.register_market(&market, domain);
        let writer = PublisherId::new("sim");
        store.allow_publisher(&market, writer.clone())?;
        Ok(Self {
            store,
            market,
            writer,
            clock: 0,
        })
    }

    fn set_index(&mut self, units: i64) -> anyhow::Result<()> {
        self.clock += 60;
        let tick = Tick::new(
            self.market.clone(),
            Timestamp::from_secs(self.clock),
            Price::from_units(units),
            TickKind::Event,
        );
        self.store.publish(&self.writer, tick)?;
        Ok(())
    }

    fn ledger(&self, config: LedgerConfig) -> Ledger {
        let mut ledger = Ledger::new(self.market.clone(), config, self.store.clone());
        ledger.set_time(Timestamp::from_secs(0));
        ledger
    }
}

async fn simulate() -> anyhow::Result<()> {
    println!("Synthetic Index Ledger Simulation\n");

    scenario_1_open_and_close()?;
    scenario_2_keeper_liquidations().await?;
    scenario_3_stop_close()?;
    scenario_4_index_and_candles()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

/// Long 10x on a score index, closed at a profit.
fn scenario_1_open_and_close() -> anyhow::Result<()> {
    println!("Scenario 1: Open and Close\n");

    let mut sim = Sim::new("score", ValueDomain::Positive)?;
    sim.set_index(60)?;
    let mut ledger = sim.ledger(LedgerConfig::default());
    ledger.fund_pool(Amount::new(100 * ONE))?;

    let alice = AccountId(1);
    let opened = ledger.open(alice, Side::Long, 10, Amount::new(ONE))?;
    println!("  Alice opens LONG 10x with 1.0, fee {}, margin {}", opened.fee, opened.margin);

    sim.set_index(66)?;
    let estimate = ledger.estimate_close(alice)?;
    println!("  Index 60 -> 66, unrealized pnl {}", estimate.pnl);

    let closed = ledger.close(alice)?;
    println!(
        "  Alice closes: settlement {}, close fee {}",
        closed.settlement.settlement, closed.settlement.fee_collected
    );
    println!("  Treasury {}, pool {}\n", ledger.treasury_balance(), ledger.pool_balance());
    Ok(())
}

/// Several leveraged positions, a crash, and a keeper with a small action cap.
async fn scenario_2_keeper_liquidations() -> anyhow::Result<()> {
    println!("Scenario 2: Keeper Liquidations\n");

    let mut sim = Sim::new("crash", ValueDomain::Positive)?;
    sim.set_index(100)?;
    let mut ledger = sim.ledger(LedgerConfig::default());
    ledger.fund_pool(Amount::new(1_000 * ONE))?;

    for (i, leverage) in [5u32, 20, 50, 100, 150].into_iter().enumerate() {
        let account = AccountId(i as u64 + 1);
        ledger.open(account, Side::Long, leverage, Amount::new(ONE))?;
        let liq = liquidation_price(ledger.position(account).context("position just opened")?, ledger.config().maintenance_margin)?;
        let liq = liq.map(|p| p.to_string()).unwrap_or_else(|| "none".to_string());
        println!("  {account} LONG {leverage}x, liquidation price {liq}");
    }

    let shared = SharedLedger::new(ledger);
    let keeper_config = KeeperConfig {
        max_actions_per_loop: 2,
        keeper_account: AccountId(999),
        ..KeeperConfig::default()
    };
    let mut keeper = Keeper::new(shared.clone(), keeper_config);

    sim.set_index(95)?;
    println!("\n  Index drops 100 -> 95");

    for cycle in 1..=3 {
        let report = keeper.run_cycle().await;
        println!(
            "  Cycle {cycle}: executed {}, carried over {}, open {}",
            report.executed,
            report.carried_over,
            keeper.open_set().len()
        );
    }

    let ledger = shared.lock().await;
    println!("  Keeper rewards {}\n", ledger.credit_of(AccountId(999)));
    Ok(())
}

/// Take-profit closed by a third party.
fn scenario_3_stop_close() -> anyhow::Result<()> {
    println!("Scenario 3: Stop Close\n");

    let mut sim = Sim::new("dominance", ValueDomain::Percentage)?;
    sim.set_index(60)?;
    let mut ledger = sim.ledger(LedgerConfig::default());
    ledger.fund_pool(Amount::new(100 * ONE))?;

    let bob = AccountId(2);
    ledger.open(bob, Side::Short, 5, Amount::new(ONE))?;
    ledger.set_stops(
        bob,
        StopUpdate::Set(Price::from_units(65)),
        StopUpdate::Set(Price::from_units(50)),
    )?;
    println!("  Bob SHORT 5x at 60, stop loss 65, take profit 50");

    sim.set_index(49)?;
    let check = ledger.should_close(bob)?;
    println!("  Index 49: triggered {}, take profit {}", check.triggered, check.hit_take_profit);

    let closed = ledger.close_if_triggered(AccountId(7), bob)?;
    println!("  Closed by #7, Bob receives {}\n", closed.settlement.settlement);
    Ok(())
}

/// Additive score index fed by deltas, charted as one-minute candles.
fn scenario_4_index_and_candles() -> anyhow::Result<()> {
    println!("Scenario 4: Index Aggregation and Candles\n");

    let store = IndexStore::default();
    let spec = MarketSpec {
        market: MarketId::qualified("sim", "nba"),
        domain: ValueDomain::Positive,
        mode: CombineMode::additive(Price::from_units(1)),
        initial: Price::from_units(10_000),
        continuity: true,
    };
    let mut aggregator = Aggregator::new(spec, PublisherId::new("sim"), &AggregatorConfig::default());
    aggregator.attach(&store)?;

    let deltas = [1i64, 1, 1, -1, 0, 3, -2];
    for (i, delta) in deltas.into_iter().enumerate() {
        let reading = Reading::Delta {
            source: "nba".to_string(),
            event_id: i as u64 + 1,
            delta,
            timestamp: Timestamp::from_secs(i as i64 * 25),
            meta: None,
        };
        aggregator.poll(&store, &[reading], Timestamp::from_secs(i as i64 * 25))?;
        aggregator.poll(&store, &[], Timestamp::from_secs(i as i64 * 25 + 10))?;
    }
    println!("  Final index {}", aggregator.working_value());

    for candle in aggregate_timeframe(&store.points(aggregator.market()), Timeframe::M1) {
        println!(
            "  {} open {} high {} low {} close {}",
            candle.time, candle.open, candle.high, candle.low, candle.close
        );
    }
    Ok(())
}
