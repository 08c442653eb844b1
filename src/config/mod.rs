//! Configuration module for Tradecore.
//!
//! Every setting is read from the environment (a `.env` file is loaded by the
//! binary) and falls back to a default when unset. A value that is set but
//! does not parse is an error, never a silent default.

mod ledger_env_config;
mod resilience_env_config;
mod trading_env_config;

pub use ledger_env_config::LedgerEnvConfig;
pub use resilience_env_config::{BreakerEnvConfig, EventBusEnvConfig};
pub use trading_env_config::{ArbitrageEnvConfig, OrchestratorEnvConfig};

use anyhow::{Context, Result};
use std::str::FromStr;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/tradecore.db";

/// Source of raw configuration values, keyed by variable name.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

pub(crate) fn parse_or<T>(env: &dyn EnvSource, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Failed to parse {}={:?}", key, raw)),
        None => Ok(default),
    }
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Keep the ledger in memory instead of SQLite
    pub in_memory: bool,
    pub ledger: LedgerEnvConfig,
    pub breaker: BreakerEnvConfig,
    pub event_bus: EventBusEnvConfig,
    pub orchestrator: OrchestratorEnvConfig,
    pub arbitrage: ArbitrageEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let database_url = env
            .get("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        Ok(Self {
            in_memory: parse_or(env, "LEDGER_IN_MEMORY", false)?,
            database_url,
            ledger: LedgerEnvConfig::from_source(env).context("Invalid ledger configuration")?,
            breaker: BreakerEnvConfig::from_source(env).context("Invalid breaker configuration")?,
            event_bus: EventBusEnvConfig::from_source(env)
                .context("Invalid event bus configuration")?,
            orchestrator: OrchestratorEnvConfig::from_source(env)
                .context("Invalid orchestrator configuration")?,
            arbitrage: ArbitrageEnvConfig::from_source(env)
                .context("Invalid arbitrage configuration")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            in_memory: false,
            ledger: LedgerEnvConfig::default(),
            breaker: BreakerEnvConfig::default(),
            event_bus: EventBusEnvConfig::default(),
            orchestrator: OrchestratorEnvConfig::default(),
            arbitrage: ArbitrageEnvConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_source(&env(&[])).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(!config.in_memory);
        assert_eq!(config.ledger.min_balance, dec!(100.00));
        assert_eq!(config.ledger.max_positions_per_portfolio, 50);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.event_bus.queue_size, 1000);
        assert_eq!(config.orchestrator.max_notional, dec!(1000));
        assert_eq!(config.arbitrage.min_roi, dec!(0.01));
        assert!(!config.arbitrage.auto_execute);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_source(&env(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("MIN_BALANCE", "250.50"),
            ("COMMISSION_RATE", "0.001"),
            ("BREAKER_FAILURE_THRESHOLD", "3"),
            ("ARBITRAGE_AUTO_EXECUTE", "true"),
            ("MIN_CONFIDENCE", " 0.75 "),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.ledger.min_balance, dec!(250.50));
        assert_eq!(config.ledger.commission_rate, dec!(0.001));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert!(config.arbitrage.auto_execute);
        assert_eq!(config.orchestrator.min_confidence, 0.75);
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let err = Config::from_source(&env(&[("MAX_POSITIONS_PER_PORTFOLIO", "many")])).unwrap_err();
        assert!(format!("{:#}", err).contains("MAX_POSITIONS_PER_PORTFOLIO"));

        assert!(Config::from_source(&env(&[("ARBITRAGE_AUTO_EXECUTE", "yes")])).is_err());
    }
}
