use crate::domain::trading::types::{AssetClass, PortfolioId, PositionId};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Caller-supplied input violates a precondition. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Price must be positive, got {price}")]
    NonPositivePrice { price: Decimal },

    #[error("Price {price} outside allowed range [{min}, {max}]")]
    PriceOutOfRange {
        price: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Quantity must be positive, got {quantity}")]
    NonPositiveQuantity { quantity: Decimal },

    #[error("Quantity {quantity} outside allowed range [{min}, {max}]")]
    QuantityOutOfRange {
        quantity: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Symbol must not be empty")]
    EmptySymbol,

    #[error("Symbol {symbol} longer than {max} characters")]
    SymbolTooLong { symbol: String, max: usize },

    #[error("Symbol {symbol} must be alphanumeric")]
    InvalidSymbol { symbol: String },

    #[error("{name} must be between 0 and 1, got {value}")]
    InvalidPercentage { name: &'static str, value: Decimal },

    #[error("Insufficient balance: need ${need}, available ${available}")]
    InsufficientBalance { need: Decimal, available: Decimal },

    #[error("Trade would leave ${remaining} below minimum balance ${floor}")]
    MinBalanceViolation { remaining: Decimal, floor: Decimal },

    #[error("Position size ${cost} exceeds limit ${limit}")]
    PositionSizeExceeded { cost: Decimal, limit: Decimal },

    #[error("Maximum open positions reached: {max}")]
    MaxPositionsReached { max: usize },

    #[error("No open position for {symbol}")]
    NoOpenPosition { symbol: String },

    #[error("Insufficient quantity for {symbol}: requested {requested}, held {held}")]
    InsufficientQuantity {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("Portfolio {portfolio_id} not found")]
    PortfolioNotFound { portfolio_id: PortfolioId },

    #[error("Position {position_id} not found")]
    PositionNotFound { position_id: PositionId },
}

/// Storage-layer failures surfaced by ledger stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Portfolio {portfolio_id} is locked by a concurrent transaction")]
    Locked { portfolio_id: PortfolioId },

    #[error("Portfolio {portfolio_id} not found")]
    PortfolioNotFound { portfolio_id: PortfolioId },

    #[error("Position {position_id} not found")]
    PositionNotFound { position_id: PositionId },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Failure taxonomy of the ledger engine.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("Concurrent trade in progress on portfolio {portfolio_id}, retry")]
    ConcurrencyConflict { portfolio_id: PortfolioId },

    #[error("Dependency {dependency} unavailable: {reason}")]
    DependencyUnavailable {
        dependency: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[source] StoreError),
}

impl TradingError {
    /// Contention and unavailable dependencies may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::ConcurrencyConflict { .. } | TradingError::DependencyUnavailable { .. }
        )
    }
}

impl From<StoreError> for TradingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Locked { portfolio_id } => TradingError::ConcurrencyConflict { portfolio_id },
            StoreError::PortfolioNotFound { portfolio_id } => {
                TradingError::ValidationFailed(ValidationError::PortfolioNotFound { portfolio_id })
            }
            StoreError::PositionNotFound { position_id } => {
                TradingError::ValidationFailed(ValidationError::PositionNotFound { position_id })
            }
            other => TradingError::PersistenceFailure(other),
        }
    }
}

/// A saga step failed; completed steps were compensated in reverse order.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error(
        "Saga {saga_id} failed at step '{failed_step}': {cause} (compensated: {compensated:?}, compensation failures: {compensation_failures:?})"
    )]
    Failed {
        saga_id: String,
        failed_step: String,
        cause: anyhow::Error,
        compensated: Vec<String>,
        compensation_failures: Vec<String>,
    },
}

impl SagaError {
    pub fn failed_step(&self) -> &str {
        match self {
            SagaError::Failed { failed_step, .. } => failed_step,
        }
    }

    pub fn compensation_failures(&self) -> &[String] {
        match self {
            SagaError::Failed {
                compensation_failures,
                ..
            } => compensation_failures,
        }
    }
}

/// Errors surfaced by the multi-asset orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No adapter registered for asset class {asset_class}")]
    AdapterNotRegistered { asset_class: AssetClass },

    #[error("Dependency {dependency} unavailable: {reason}")]
    DependencyUnavailable {
        dependency: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl OrchestratorError {
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, OrchestratorError::AdapterNotRegistered { .. })
    }
}

/// Errors related to the event bus lifecycle.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Event bus already started")]
    AlreadyStarted,

    #[error("Event bus was stopped and cannot be restarted")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validation_error_formatting() {
        let error = ValidationError::InsufficientBalance {
            need: dec!(1500.00),
            available: dec!(1000.00),
        };

        let msg = error.to_string();
        assert!(msg.contains("1500.00"));
        assert!(msg.contains("1000.00"));
    }

    #[test]
    fn test_locked_store_maps_to_conflict() {
        let err: TradingError = StoreError::Locked { portfolio_id: 7 }.into();
        assert!(matches!(err, TradingError::ConcurrencyConflict { portfolio_id: 7 }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_backend_store_error_is_persistence_failure() {
        let err: TradingError = StoreError::Backend("disk full".to_string()).into();
        assert!(matches!(err, TradingError::PersistenceFailure(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_saga_error_carries_cause() {
        let err = SagaError::Failed {
            saga_id: "s-1".to_string(),
            failed_step: "leg_b".to_string(),
            cause: anyhow::anyhow!("venue rejected order"),
            compensated: vec!["leg_a".to_string()],
            compensation_failures: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("leg_b"));
        assert!(msg.contains("venue rejected order"));
        assert_eq!(err.failed_step(), "leg_b");
    }
}
