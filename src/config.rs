// 7.0 config.rs: all settings in one place. ledger fees and margins, aggregator polling, keeper cadence.
// 7.1 AppConfig::from_env reads the environment (and .env through dotenvy in main).

use crate::types::{AccountId, Bps, MarketId, Price};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/** 7.2: ledger risk settings. bps throughout, 100 bps = 1% */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    // charged on notional at open and again at close
    pub taker_fee: Bps,
    // equity at or below this fraction of notional is liquidatable
    pub maintenance_margin: Bps,
    // cap on the liquidator's reward, fraction of notional
    pub liquidation_fee: Bps,
    pub max_leverage: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            taker_fee: Bps::new(10),          // 0.1%
            maintenance_margin: Bps::new(625), // 6.25%
            liquidation_fee: Bps::new(50),     // 0.5%
            max_leverage: 150,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_leverage == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_LEVERAGE",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.maintenance_margin.value() == 0 || self.maintenance_margin.value() >= 10_000 {
            return Err(ConfigError::Invalid {
                key: "MAINTENANCE_MARGIN_BPS",
                reason: "must be between 1 and 9999".to_string(),
            });
        }
        if self.liquidation_fee.value() > 10_000 {
            return Err(ConfigError::Invalid {
                key: "LIQUIDATION_FEE_BPS",
                reason: "cannot exceed 10000".to_string(),
            });
        }
        // at max leverage the opening fee must leave some margin behind
        if self.taker_fee.value() as u64 * self.max_leverage as u64 >= 10_000 {
            return Err(ConfigError::Invalid {
                key: "TAKER_FEE_BPS",
                reason: format!(
                    "{} bps at {}x would consume the whole deposit",
                    self.taker_fee.value(),
                    self.max_leverage
                ),
            });
        }
        Ok(())
    }
}

// index aggregator polling and publish guard
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    // smallest move worth publishing
    pub min_change: Price,
    // publish anyway once the last tick is this old
    pub stale_after: Duration,
    // multiplier applied to the backoff on a 429 (plain failures double)
    pub rate_limit_factor: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_backoff: Duration::from_secs(300),
            min_change: Price::from_raw_unchecked(1_000_000), // 0.01
            stale_after: Duration::from_secs(600),
            rate_limit_factor: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeeperConfig {
    pub action_interval: Duration,
    pub scan_interval: Duration,
    // max events pulled per gateway call while scanning
    pub scan_chunk: u64,
    pub max_actions_per_loop: usize,
    pub account_backoff_base: Duration,
    pub account_backoff_max: Duration,
    // identity the keeper liquidates as; rewards are credited here
    pub keeper_account: AccountId,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            action_interval: Duration::from_secs(10),
            scan_interval: Duration::from_secs(30),
            scan_chunk: 500,
            max_actions_per_loop: 5,
            account_backoff_base: Duration::from_secs(5),
            account_backoff_max: Duration::from_secs(120),
            keeper_account: AccountId(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ingest_secret: Option<String>,
    pub max_ticks: usize,
    pub max_events: usize,
    // display events older than this drop off the live list
    pub event_retention: Duration,
    // markets (chain:market) whose values are bounded to [0, 100]
    pub percentage_markets: Vec<MarketId>,
    pub feed_url: Option<String>,
    pub ledger_market: MarketId,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ingest_secret: None,
            max_ticks: 10_000,
            max_events: 200,
            event_retention: Duration::from_secs(86_400),
            percentage_markets: Vec::new(),
            feed_url: None,
            ledger_market: MarketId::new("local:random-walk"),
        }
    }
}

// The complete service configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub aggregator: AggregatorConfig,
    pub keeper: KeeperConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        let ledger = LedgerConfig {
            taker_fee: Bps::new(parse_or(&lookup, "TAKER_FEE_BPS", defaults.ledger.taker_fee.value())?),
            maintenance_margin: Bps::new(parse_or(
                &lookup,
                "MAINTENANCE_MARGIN_BPS",
                defaults.ledger.maintenance_margin.value(),
            )?),
            liquidation_fee: Bps::new(parse_or(
                &lookup,
                "LIQUIDATION_FEE_BPS",
                defaults.ledger.liquidation_fee.value(),
            )?),
            max_leverage: parse_or(&lookup, "MAX_LEVERAGE", defaults.ledger.max_leverage)?,
        };

        let min_change: Decimal = parse_or(&lookup, "MIN_CHANGE", dec!(0.01))?;
        let min_change = Price::from_decimal(min_change).ok_or(ConfigError::Invalid {
            key: "MIN_CHANGE",
            reason: "must be a positive decimal".to_string(),
        })?;

        let aggregator = AggregatorConfig {
            poll_interval: secs(parse_or(&lookup, "POLL_INTERVAL_SECS", 15)?),
            max_backoff: secs(parse_or(&lookup, "MAX_BACKOFF_SECS", 300)?),
            min_change,
            stale_after: secs(parse_or(&lookup, "STALE_AFTER_SECS", 600)?),
            rate_limit_factor: parse_or(&lookup, "RATE_LIMIT_FACTOR", 4)?,
        };

        let keeper = KeeperConfig {
            action_interval: secs(parse_or(&lookup, "KEEPER_INTERVAL_SECS", 10)?),
            scan_interval: secs(parse_or(&lookup, "KEEPER_SCAN_INTERVAL_SECS", 30)?),
            scan_chunk: parse_or(&lookup, "KEEPER_SCAN_CHUNK", 500)?,
            max_actions_per_loop: parse_or(&lookup, "KEEPER_MAX_ACTIONS", 5)?,
            account_backoff_base: secs(parse_or(&lookup, "KEEPER_BACKOFF_SECS", 5)?),
            account_backoff_max: secs(parse_or(&lookup, "KEEPER_MAX_BACKOFF_SECS", 120)?),
            keeper_account: AccountId(parse_or(&lookup, "KEEPER_ACCOUNT", 0)?),
        };

        let server = ServerConfig {
            host: lookup("HOST").unwrap_or(defaults.server.host),
            port: parse_or(&lookup, "PORT", defaults.server.port)?,
            ingest_secret: lookup("INGEST_SECRET").filter(|s| !s.is_empty()),
            max_ticks: parse_or(&lookup, "MAX_TICKS", defaults.server.max_ticks)?,
            max_events: parse_or(&lookup, "MAX_EVENTS", defaults.server.max_events)?,
            event_retention: secs(parse_or(&lookup, "EVENT_RETENTION_SECS", 86_400)?),
            percentage_markets: lookup("PERCENTAGE_MARKETS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(MarketId::new)
                        .collect()
                })
                .unwrap_or_default(),
            feed_url: lookup("FEED_URL").filter(|s| !s.is_empty()),
            ledger_market: lookup("LEDGER_MARKET")
                .map(MarketId::new)
                .unwrap_or(defaults.server.ledger_market),
        };

        let config = AppConfig {
            ledger,
            aggregator,
            keeper,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ledger.validate()?;

        if self.aggregator.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.aggregator.max_backoff < self.aggregator.poll_interval {
            return Err(ConfigError::Invalid {
                key: "MAX_BACKOFF_SECS",
                reason: "must not be shorter than the polling interval".to_string(),
            });
        }
        // a zero threshold would count every unchanged poll as a move
        if self.aggregator.min_change.is_zero() {
            return Err(ConfigError::Invalid {
                key: "MIN_CHANGE",
                reason: "must be positive".to_string(),
            });
        }
        if self.keeper.max_actions_per_loop == 0 {
            return Err(ConfigError::Invalid {
                key: "KEEPER_MAX_ACTIONS",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.keeper.scan_chunk == 0 {
            return Err(ConfigError::Invalid {
                key: "KEEPER_SCAN_CHUNK",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.server.max_ticks == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_TICKS",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.server.event_retention.is_zero() {
            return Err(ConfigError::Invalid {
                key: "EVENT_RETENTION_SECS",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: format!("{raw:?}: {e}"),
        }),
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("missing required setting {0}")]
    Missing(&'static str),
}
