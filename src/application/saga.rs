//! Saga Coordinator
//!
//! Runs an ordered list of steps, each paired with a compensation. When a
//! step fails, the compensations of every completed step run in reverse
//! order. A failing compensation is logged and recorded but never stops the
//! remaining ones. The coordinator is consumed by `execute`: retrying means
//! building a new saga.
//!
//! Step state that a compensation needs (an order id, a filled quantity) is
//! shared by capturing the same `Arc` in both closures.

use crate::domain::errors::SagaError;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type StepFn = Box<dyn FnOnce() -> StepFuture + Send>;

struct SagaStep {
    name: String,
    action: StepFn,
    compensation: StepFn,
}

/// Result of a saga that ran every step.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaOutcome {
    pub saga_id: String,
    pub completed_steps: Vec<String>,
}

pub struct SagaCoordinator {
    saga_id: String,
    steps: Vec<SagaStep>,
}

impl Default for SagaCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaCoordinator {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(saga_id: impl Into<String>) -> Self {
        Self {
            saga_id: saga_id.into(),
            steps: Vec::new(),
        }
    }

    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step and its compensation to the plan.
    pub fn add_step<A, AF, C, CF>(
        &mut self,
        name: impl Into<String>,
        action: A,
        compensation: C,
    ) -> &mut Self
    where
        A: FnOnce() -> AF + Send + 'static,
        AF: Future<Output = anyhow::Result<()>> + Send + 'static,
        C: FnOnce() -> CF + Send + 'static,
        CF: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push(SagaStep {
            name: name.into(),
            action: Box::new(move || Box::pin(action()) as StepFuture),
            compensation: Box::new(move || Box::pin(compensation()) as StepFuture),
        });
        self
    }

    /// Run every step in order, compensating completed steps on the first failure.
    pub async fn execute(self) -> Result<SagaOutcome, SagaError> {
        let saga_id = self.saga_id;
        info!("Saga {}: starting with {} steps", saga_id, self.steps.len());

        let mut completed: Vec<(String, StepFn)> = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            debug!("Saga {}: executing step '{}'", saga_id, step.name);
            match (step.action)().await {
                Ok(()) => completed.push((step.name, step.compensation)),
                Err(cause) => {
                    error!(
                        "Saga {}: step '{}' failed: {:#}",
                        saga_id, step.name, cause
                    );
                    let (compensated, compensation_failures) =
                        compensate(&saga_id, completed).await;
                    return Err(SagaError::Failed {
                        saga_id,
                        failed_step: step.name,
                        cause,
                        compensated,
                        compensation_failures,
                    });
                }
            }
        }

        info!("Saga {}: completed successfully", saga_id);
        Ok(SagaOutcome {
            saga_id,
            completed_steps: completed.into_iter().map(|(name, _)| name).collect(),
        })
    }
}

/// Reverse-order compensation. Returns (compensated, failures).
async fn compensate(saga_id: &str, completed: Vec<(String, StepFn)>) -> (Vec<String>, Vec<String>) {
    if completed.is_empty() {
        return (Vec::new(), Vec::new());
    }
    warn!(
        "Saga {}: compensating {} completed step(s)",
        saga_id,
        completed.len()
    );

    let mut compensated = Vec::new();
    let mut failures = Vec::new();
    for (name, compensation) in completed.into_iter().rev() {
        debug!("Saga {}: compensating step '{}'", saga_id, name);
        match compensation().await {
            Ok(()) => compensated.push(name),
            Err(e) => {
                error!(
                    "Saga {}: compensation for '{}' failed, manual intervention needed: {:#}",
                    saga_id, name, e
                );
                failures.push(format!("{}: {}", name, e));
            }
        }
    }
    (compensated, failures)
}
