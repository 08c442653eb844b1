use crate::domain::events::{CircuitBreakerTripped, DomainEvent};
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - allow limited requests
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen needed to close the circuit
    pub success_threshold: u32,
    /// Time spent Open before the next call is let through as a trial
    pub recovery_timeout: Duration,
    /// Trial calls allowed in flight while HalfOpen
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Point-in-time view of a breaker, for operators and health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Circuit breaker for protecting against cascading failures
pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitBreakerState>>,
    half_open_in_flight: Arc<AtomicU32>,
    config: CircuitBreakerConfig,
    name: String,
    event_bus: Option<EventBus>,
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_failure_at: None,
        }
    }
}

/// Releases a HalfOpen trial slot even if the guarded future is dropped.
struct TrialSlot(Arc<AtomicU32>);

impl Drop for TrialSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    ///
    /// # Arguments
    /// * `name` - Dependency name, used for logging and events
    /// * `failure_threshold` - Number of consecutive failures before opening circuit
    /// * `success_threshold` - Number of consecutive successes in HalfOpen to close circuit
    /// * `timeout` - Duration to wait before transitioning from Open to HalfOpen
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        timeout: Duration,
    ) -> Self {
        Self::with_config(
            name,
            CircuitBreakerConfig {
                failure_threshold,
                success_threshold,
                recovery_timeout: timeout,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitBreakerState::closed())),
            half_open_in_flight: Arc::new(AtomicU32::new(0)),
            config,
            name: name.into(),
            event_bus: None,
        }
    }

    /// Publish a `CircuitBreakerTripped` event on every transition to Open.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute a function with circuit breaker protection.
    ///
    /// The wrapped call's own result or error is always returned unchanged
    /// inside `Ok` / `Inner`; the breaker only decides whether to attempt it.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let _slot = self.admit::<E>().await?;

        match f.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(e) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Decide whether a call may proceed, moving Open -> HalfOpen when due.
    async fn admit<E>(&self) -> Result<Option<TrialSlot>, CircuitBreakerError<E>> {
        let mut state = self.state.write().await;

        if state.state == CircuitState::Open {
            let elapsed = state
                .last_failure_time
                .map(|t| t.elapsed())
                .unwrap_or(self.config.recovery_timeout);
            if elapsed >= self.config.recovery_timeout {
                info!(
                    "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (timeout elapsed)",
                    self.name
                );
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
            } else {
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after: self.config.recovery_timeout.saturating_sub(elapsed),
                });
            }
        }

        if state.state == CircuitState::HalfOpen {
            let in_flight = self.half_open_in_flight.fetch_add(1, Ordering::SeqCst);
            let slot = TrialSlot(self.half_open_in_flight.clone());
            if in_flight >= self.config.half_open_max_calls {
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after: Duration::ZERO,
                });
            }
            return Ok(Some(slot));
        }

        Ok(None)
    }

    /// Record a successful call
    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed ({} successes)",
                        self.name, state.success_count
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                // A call admitted before another trial reopened the circuit
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (ignored)",
                    self.name
                );
            }
        }
    }

    /// Record a failed call
    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, state.failure_count
                    );
                    state.state = CircuitState::Open;
                    self.publish_tripped(state.failure_count);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (failure during recovery)",
                    self.name
                );
                state.state = CircuitState::Open;
                state.success_count = 0;
                self.publish_tripped(state.failure_count);
            }
            CircuitState::Open => {}
        }
    }

    fn publish_tripped(&self, failure_count: u32) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::breaker_tripped(CircuitBreakerTripped {
                dependency: self.name.clone(),
                failure_count,
                recovery_timeout_seconds: self.config.recovery_timeout.as_secs(),
            }));
        }
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.read().await;
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_at: state.last_failure_at,
        }
    }

    /// Operator reset back to Closed with cleared counters.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        if state.state != CircuitState::Closed {
            info!("CircuitBreaker [{}]: Manually reset to Closed", self.name);
        }
        *state = CircuitBreakerState::closed();
    }
}

/// Error type for circuit breaker
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker [{name}] is open, retry after {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}
