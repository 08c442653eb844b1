//! Signal execution and arbitrage scanning settings.

use super::{EnvSource, parse_or};
use crate::application::arbitrage::{DetectorConfig, ScannerConfig};
use crate::application::orchestrator::OrchestratorConfig;
use crate::application::risk_management::sizing_engine::SizingConfig;
use anyhow::{Result, ensure};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorEnvConfig {
    pub min_confidence: f64,
    pub min_notional: Decimal,
    pub max_notional: Decimal,
    pub idempotency_ttl_secs: u64,
}

impl Default for OrchestratorEnvConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.60,
            min_notional: dec!(10),
            max_notional: dec!(1000),
            idempotency_ttl_secs: 86_400,
        }
    }
}

impl OrchestratorEnvConfig {
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            min_confidence: parse_or(env, "MIN_CONFIDENCE", d.min_confidence)?,
            min_notional: parse_or(env, "MIN_NOTIONAL", d.min_notional)?,
            max_notional: parse_or(env, "MAX_NOTIONAL", d.max_notional)?,
            idempotency_ttl_secs: parse_or(env, "IDEMPOTENCY_TTL_SECS", d.idempotency_ttl_secs)?,
        };
        ensure!(
            (0.0..=1.0).contains(&config.min_confidence),
            "MIN_CONFIDENCE must be between 0 and 1"
        );
        ensure!(
            config.min_notional > Decimal::ZERO && config.min_notional <= config.max_notional,
            "MIN_NOTIONAL must be positive and not above MAX_NOTIONAL"
        );
        Ok(config)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            min_confidence: self.min_confidence,
            sizing: SizingConfig {
                min_notional: self.min_notional,
                max_notional: self.max_notional,
                ..SizingConfig::default()
            },
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrageEnvConfig {
    pub min_roi: Decimal,
    pub similarity_threshold: f64,
    pub scan_interval_secs: u64,
    pub auto_execute: bool,
    pub signal_confidence: f64,
}

impl Default for ArbitrageEnvConfig {
    fn default() -> Self {
        Self {
            min_roi: dec!(0.01),
            similarity_threshold: 0.8,
            scan_interval_secs: 60,
            auto_execute: false,
            signal_confidence: 0.9,
        }
    }
}

impl ArbitrageEnvConfig {
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            min_roi: parse_or(env, "ARBITRAGE_MIN_ROI", d.min_roi)?,
            similarity_threshold: parse_or(
                env,
                "ARBITRAGE_SIMILARITY_THRESHOLD",
                d.similarity_threshold,
            )?,
            scan_interval_secs: parse_or(env, "ARBITRAGE_SCAN_INTERVAL_SECS", d.scan_interval_secs)?,
            auto_execute: parse_or(env, "ARBITRAGE_AUTO_EXECUTE", d.auto_execute)?,
            signal_confidence: parse_or(env, "ARBITRAGE_SIGNAL_CONFIDENCE", d.signal_confidence)?,
        };
        ensure!(
            (0.0..=1.0).contains(&config.similarity_threshold),
            "ARBITRAGE_SIMILARITY_THRESHOLD must be between 0 and 1"
        );
        ensure!(config.scan_interval_secs > 0, "ARBITRAGE_SCAN_INTERVAL_SECS must be positive");
        Ok(config)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            min_roi: self.min_roi,
            similarity_threshold: self.similarity_threshold,
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            interval: Duration::from_secs(self.scan_interval_secs),
            auto_execute: self.auto_execute,
            signal_confidence: self.signal_confidence,
            ..ScannerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_notional_bounds_flow_into_sizing() {
        let mut env = HashMap::new();
        env.insert("MIN_NOTIONAL".to_string(), "25".to_string());
        env.insert("MAX_NOTIONAL".to_string(), "500".to_string());
        let config = OrchestratorEnvConfig::from_source(&env).unwrap().orchestrator_config();

        assert_eq!(config.sizing.min_notional, dec!(25));
        assert_eq!(config.sizing.max_notional, dec!(500));
        assert_eq!(config.sizing.kelly_fraction, dec!(0.5));
    }

    #[test]
    fn test_inverted_notional_bounds_rejected() {
        let mut env = HashMap::new();
        env.insert("MIN_NOTIONAL".to_string(), "2000".to_string());
        assert!(OrchestratorEnvConfig::from_source(&env).is_err());
    }

    #[test]
    fn test_scanner_config_from_env() {
        let mut env = HashMap::new();
        env.insert("ARBITRAGE_SCAN_INTERVAL_SECS".to_string(), "15".to_string());
        let config = ArbitrageEnvConfig::from_source(&env).unwrap();

        assert_eq!(config.scanner_config().interval, Duration::from_secs(15));
        assert_eq!(config.scanner_config().market_limit, 100);
        assert_eq!(config.detector_config().similarity_threshold, 0.8);
    }
}
