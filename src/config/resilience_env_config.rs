use super::{EnvSource, parse_or};
use crate::infrastructure::core::CircuitBreakerConfig;
use crate::infrastructure::event_bus::EventBusConfig;
use anyhow::{Result, ensure};
use std::time::Duration;

/// Defaults applied to every breaker created by the registry.
#[derive(Debug, Clone)]
pub struct BreakerEnvConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl Default for BreakerEnvConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}

impl BreakerEnvConfig {
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            failure_threshold: parse_or(env, "BREAKER_FAILURE_THRESHOLD", d.failure_threshold)?,
            recovery_timeout_secs: parse_or(
                env,
                "BREAKER_RECOVERY_TIMEOUT_SECS",
                d.recovery_timeout_secs,
            )?,
            success_threshold: parse_or(env, "BREAKER_SUCCESS_THRESHOLD", d.success_threshold)?,
            half_open_max_calls: parse_or(env, "BREAKER_HALF_OPEN_MAX_CALLS", d.half_open_max_calls)?,
        };
        ensure!(config.failure_threshold > 0, "BREAKER_FAILURE_THRESHOLD must be positive");
        ensure!(config.success_threshold > 0, "BREAKER_SUCCESS_THRESHOLD must be positive");
        ensure!(config.half_open_max_calls > 0, "BREAKER_HALF_OPEN_MAX_CALLS must be positive");
        Ok(config)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBusEnvConfig {
    pub queue_size: usize,
    pub shutdown_timeout_ms: u64,
    pub handler_timeout_ms: u64,
}

impl Default for EventBusEnvConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            shutdown_timeout_ms: 5000,
            handler_timeout_ms: 5000,
        }
    }
}

impl EventBusEnvConfig {
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            queue_size: parse_or(env, "EVENT_BUS_QUEUE_SIZE", d.queue_size)?,
            shutdown_timeout_ms: parse_or(env, "EVENT_BUS_SHUTDOWN_TIMEOUT_MS", d.shutdown_timeout_ms)?,
            handler_timeout_ms: parse_or(env, "EVENT_BUS_HANDLER_TIMEOUT_MS", d.handler_timeout_ms)?,
        };
        // tokio's bounded channel panics on zero capacity
        ensure!(config.queue_size > 0, "EVENT_BUS_QUEUE_SIZE must be positive");
        Ok(config)
    }

    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            queue_size: self.queue_size,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            handler_timeout: Duration::from_millis(self.handler_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_breaker_defaults_match_registry_defaults() {
        let config = BreakerEnvConfig::from_source(&HashMap::new()).unwrap();
        let breaker = config.breaker_config();
        let defaults = CircuitBreakerConfig::default();

        assert_eq!(breaker.failure_threshold, defaults.failure_threshold);
        assert_eq!(breaker.success_threshold, defaults.success_threshold);
        assert_eq!(breaker.recovery_timeout, defaults.recovery_timeout);
        assert_eq!(breaker.half_open_max_calls, defaults.half_open_max_calls);
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut env = HashMap::new();
        env.insert("EVENT_BUS_QUEUE_SIZE".to_string(), "0".to_string());
        assert!(EventBusEnvConfig::from_source(&env).is_err());

        let config = EventBusEnvConfig::from_source(&HashMap::new()).unwrap();
        assert_eq!(config.bus_config(), EventBusConfig::default());
    }
}
