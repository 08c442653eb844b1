pub mod breaker_registry;
pub mod circuit_breaker;

pub use breaker_registry::CircuitBreakerRegistry;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
