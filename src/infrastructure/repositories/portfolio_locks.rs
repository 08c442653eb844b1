use crate::domain::errors::StoreError;
use crate::domain::repositories::StoreResult;
use crate::domain::trading::types::PortfolioId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One `tokio::sync::Mutex` per portfolio, taken with `try_lock_owned`.
///
/// Holding the guard is what makes a transaction the single writer of its
/// portfolio; other portfolios are never blocked by it.
#[derive(Clone, Default)]
pub struct PortfolioLocks {
    locks: Arc<Mutex<HashMap<PortfolioId, Arc<Mutex<()>>>>>,
}

impl PortfolioLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock of `id` or fail immediately with `StoreError::Locked`.
    pub async fn try_acquire(&self, id: PortfolioId) -> StoreResult<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        mutex
            .try_lock_owned()
            .map_err(|_| StoreError::Locked { portfolio_id: id })
    }
}
