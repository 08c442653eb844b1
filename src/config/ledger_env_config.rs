//! Ledger engine and stop-loss sweep settings.

use super::{EnvSource, parse_or};
use crate::application::ledger::{LedgerConfig, SweepConfig};
use anyhow::{Result, ensure};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LedgerEnvConfig {
    pub min_balance: Decimal,
    pub max_position_size_pct: Decimal,
    pub max_positions_per_portfolio: usize,
    pub initial_balance: Decimal,
    pub commission_rate: Decimal,
    pub trailing_stop_enabled: bool,
    pub stop_loss_sweep_interval_secs: u64,
}

impl Default for LedgerEnvConfig {
    fn default() -> Self {
        Self {
            min_balance: dec!(100.00),
            max_position_size_pct: dec!(0.10),
            max_positions_per_portfolio: 50,
            initial_balance: dec!(10000.00),
            commission_rate: Decimal::ZERO,
            trailing_stop_enabled: true,
            stop_loss_sweep_interval_secs: 30,
        }
    }
}

impl LedgerEnvConfig {
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            min_balance: parse_or(env, "MIN_BALANCE", d.min_balance)?,
            max_position_size_pct: parse_or(env, "MAX_POSITION_SIZE_PCT", d.max_position_size_pct)?,
            max_positions_per_portfolio: parse_or(
                env,
                "MAX_POSITIONS_PER_PORTFOLIO",
                d.max_positions_per_portfolio,
            )?,
            initial_balance: parse_or(env, "INITIAL_BALANCE", d.initial_balance)?,
            commission_rate: parse_or(env, "COMMISSION_RATE", d.commission_rate)?,
            trailing_stop_enabled: parse_or(env, "TRAILING_STOP_ENABLED", d.trailing_stop_enabled)?,
            stop_loss_sweep_interval_secs: parse_or(
                env,
                "STOP_LOSS_SWEEP_INTERVAL_SECS",
                d.stop_loss_sweep_interval_secs,
            )?,
        };

        ensure!(
            config.max_position_size_pct > Decimal::ZERO && config.max_position_size_pct <= Decimal::ONE,
            "MAX_POSITION_SIZE_PCT must be in (0, 1]"
        );
        ensure!(
            config.commission_rate >= Decimal::ZERO && config.commission_rate < Decimal::ONE,
            "COMMISSION_RATE must be in [0, 1)"
        );
        ensure!(config.min_balance >= Decimal::ZERO, "MIN_BALANCE must not be negative");
        ensure!(
            config.stop_loss_sweep_interval_secs > 0,
            "STOP_LOSS_SWEEP_INTERVAL_SECS must be positive"
        );
        Ok(config)
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            min_balance: self.min_balance,
            max_position_fraction: self.max_position_size_pct,
            max_positions: self.max_positions_per_portfolio,
            initial_balance: self.initial_balance,
            commission_rate: self.commission_rate,
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.stop_loss_sweep_interval_secs),
            trailing_enabled: self.trailing_stop_enabled,
            commission_rate: self.commission_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_maps_onto_engine_configs() {
        let mut env = HashMap::new();
        env.insert("MAX_POSITION_SIZE_PCT".to_string(), "0.25".to_string());
        env.insert("STOP_LOSS_SWEEP_INTERVAL_SECS".to_string(), "5".to_string());
        let config = LedgerEnvConfig::from_source(&env).unwrap();

        assert_eq!(config.ledger_config().max_position_fraction, dec!(0.25));
        assert_eq!(config.sweep_config().interval, Duration::from_secs(5));
        assert!(config.sweep_config().trailing_enabled);
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        let mut env = HashMap::new();
        env.insert("MAX_POSITION_SIZE_PCT".to_string(), "1.5".to_string());
        assert!(LedgerEnvConfig::from_source(&env).is_err());
    }
}
