//! In-Memory Ledger Store
//!
//! Thread-safe, in-memory implementation of the ledger store traits defined
//! in `domain::repositories`.
//!
//! # Features
//!
//! - **Non-blocking lock**: one `tokio::sync::Mutex` per portfolio, taken with `try_lock_owned`
//! - **Staged writes**: a transaction buffers its writes and overlays them on reads;
//!   commit merges them into shared state in one step, rollback or drop discards them
//! - **Failure injection**: tests can make the next insert/upsert/update/commit fail
//!
//! # Limitations
//!
//! - Data is lost on application restart
//! - No persistence across multiple instances

use crate::domain::errors::StoreError;
use crate::domain::repositories::{LedgerStore, LedgerTransaction, StoreResult};
use crate::domain::trading::portfolio::{Portfolio, Position};
use crate::domain::trading::types::{PortfolioId, PositionId, Trade};
use crate::infrastructure::repositories::portfolio_locks::PortfolioLocks;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// Step of a transaction at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    InsertTrade,
    UpsertPosition,
    UpdatePortfolio,
    Commit,
}

#[derive(Default)]
struct LedgerState {
    portfolios: HashMap<PortfolioId, Portfolio>,
    positions: BTreeMap<PositionId, Position>,
    trades: Vec<Trade>,
    next_portfolio_id: PortfolioId,
    next_position_id: PositionId,
    next_trade_id: i64,
}

impl LedgerState {
    fn next_position_id(&mut self) -> PositionId {
        self.next_position_id += 1;
        self.next_position_id
    }

    fn next_trade_id(&mut self) -> i64 {
        self.next_trade_id += 1;
        self.next_trade_id
    }
}

/// In-memory implementation of LedgerStore
/// Suitable for testing and single-instance deployments
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    locks: PortfolioLocks,
    failures: Arc<Mutex<HashMap<FailurePoint, String>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next transaction step at `point` fail with `message`.
    pub async fn fail_next(&self, point: FailurePoint, message: impl Into<String>) {
        self.failures.lock().await.insert(point, message.into());
    }

    /// Overwrite the mark of a committed position without taking the portfolio lock.
    ///
    /// Simulates an external price feed writing marks between sweeps.
    pub async fn set_current_price(&self, position_id: PositionId, price: Decimal) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let position = state
            .positions
            .get_mut(&position_id)
            .ok_or(StoreError::PositionNotFound { position_id })?;
        position.current_price = price;
        Ok(())
    }

    pub async fn trade_count(&self) -> usize {
        self.state.read().await.trades.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryLedgerTransaction {
            state: self.state.clone(),
            locks: self.locks.clone(),
            failures: self.failures.clone(),
            guard: None,
            locked: None,
            staged_portfolios: HashMap::new(),
            staged_positions: BTreeMap::new(),
            staged_trades: Vec::new(),
        }))
    }

    async fn find_portfolio(&self, id: PortfolioId) -> StoreResult<Option<Portfolio>> {
        Ok(self.state.read().await.portfolios.get(&id).cloned())
    }

    async fn get_or_create_portfolio(
        &self,
        owner: &str,
        initial_balance: Decimal,
    ) -> StoreResult<Portfolio> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.portfolios.values().find(|p| p.owner == owner) {
            return Ok(existing.clone());
        }
        state.next_portfolio_id += 1;
        let portfolio = Portfolio::new(state.next_portfolio_id, owner, initial_balance);
        state.portfolios.insert(portfolio.id, portfolio.clone());
        debug!("Created portfolio {} for {}", portfolio.id, owner);
        Ok(portfolio)
    }

    async fn open_positions(&self, portfolio_id: PortfolioId) -> StoreResult<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.portfolio_id == portfolio_id && p.is_open())
            .cloned()
            .collect())
    }

    async fn all_open_positions(&self) -> StoreResult<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state.positions.values().filter(|p| p.is_open()).cloned().collect())
    }

    async fn find_position(&self, id: PositionId) -> StoreResult<Option<Position>> {
        Ok(self.state.read().await.positions.get(&id).cloned())
    }

    async fn trades(&self, portfolio_id: PortfolioId) -> StoreResult<Vec<Trade>> {
        let state = self.state.read().await;
        Ok(state
            .trades
            .iter()
            .filter(|t| t.portfolio_id == portfolio_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryLedgerTransaction {
    state: Arc<RwLock<LedgerState>>,
    locks: PortfolioLocks,
    failures: Arc<Mutex<HashMap<FailurePoint, String>>>,
    guard: Option<OwnedMutexGuard<()>>,
    locked: Option<PortfolioId>,
    staged_portfolios: HashMap<PortfolioId, Portfolio>,
    staged_positions: BTreeMap<PositionId, Position>,
    staged_trades: Vec<Trade>,
}

impl InMemoryLedgerTransaction {
    async fn check_failure(&self, point: FailurePoint) -> StoreResult<()> {
        match self.failures.lock().await.remove(&point) {
            Some(message) => Err(StoreError::Injected(message)),
            None => Ok(()),
        }
    }

    fn ensure_locked(&self, portfolio_id: PortfolioId) -> StoreResult<()> {
        if self.locked == Some(portfolio_id) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!(
                "portfolio {} written without holding its lock",
                portfolio_id
            )))
        }
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryLedgerTransaction {
    async fn lock_portfolio_for_update(&mut self, id: PortfolioId) -> StoreResult<Portfolio> {
        if self.locked == Some(id) {
            return self
                .staged_portfolios
                .get(&id)
                .cloned()
                .ok_or(StoreError::PortfolioNotFound { portfolio_id: id });
        }
        if self.locked.is_some() {
            return Err(StoreError::Backend(
                "transaction already holds another portfolio lock".to_string(),
            ));
        }

        let portfolio = self
            .state
            .read()
            .await
            .portfolios
            .get(&id)
            .cloned()
            .ok_or(StoreError::PortfolioNotFound { portfolio_id: id })?;

        let guard = self.locks.try_acquire(id).await?;

        // Re-read under the lock: a transaction that committed between the
        // first read and the lock may have changed the portfolio.
        let portfolio = self
            .state
            .read()
            .await
            .portfolios
            .get(&id)
            .cloned()
            .unwrap_or(portfolio);

        self.guard = Some(guard);
        self.locked = Some(id);
        self.staged_portfolios.insert(id, portfolio.clone());
        Ok(portfolio)
    }

    async fn open_positions(&mut self, portfolio_id: PortfolioId) -> StoreResult<Vec<Position>> {
        let state = self.state.read().await;
        let mut merged: BTreeMap<PositionId, Position> = state
            .positions
            .iter()
            .filter(|(_, p)| p.portfolio_id == portfolio_id)
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        for (id, staged) in &self.staged_positions {
            if staged.portfolio_id == portfolio_id {
                merged.insert(*id, staged.clone());
            }
        }
        Ok(merged.into_values().filter(|p| p.is_open()).collect())
    }

    async fn find_position(&mut self, id: PositionId) -> StoreResult<Option<Position>> {
        if let Some(staged) = self.staged_positions.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.state.read().await.positions.get(&id).cloned())
    }

    async fn upsert_position(&mut self, position: &Position) -> StoreResult<Position> {
        self.ensure_locked(position.portfolio_id)?;
        self.check_failure(FailurePoint::UpsertPosition).await?;

        let mut saved = position.clone();
        if saved.id == 0 {
            saved.id = self.state.write().await.next_position_id();
        } else if !self.staged_positions.contains_key(&saved.id)
            && !self.state.read().await.positions.contains_key(&saved.id)
        {
            return Err(StoreError::PositionNotFound {
                position_id: saved.id,
            });
        }
        self.staged_positions.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn insert_trade(&mut self, trade: &Trade) -> StoreResult<Trade> {
        self.ensure_locked(trade.portfolio_id)?;
        self.check_failure(FailurePoint::InsertTrade).await?;

        let mut saved = trade.clone();
        saved.id = self.state.write().await.next_trade_id();
        self.staged_trades.push(saved.clone());
        Ok(saved)
    }

    async fn update_portfolio(&mut self, portfolio: &Portfolio) -> StoreResult<()> {
        self.ensure_locked(portfolio.id)?;
        self.check_failure(FailurePoint::UpdatePortfolio).await?;
        self.staged_portfolios.insert(portfolio.id, portfolio.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.check_failure(FailurePoint::Commit).await?;

        let shared = self.state.clone();
        let mut state = shared.write().await;
        for (id, portfolio) in self.staged_portfolios.drain() {
            state.portfolios.insert(id, portfolio);
        }
        for (id, position) in std::mem::take(&mut self.staged_positions) {
            state.positions.insert(id, position);
        }
        state.trades.append(&mut self.staged_trades);
        drop(state);

        // Release the portfolio lock only after the writes are visible
        self.guard.take();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        if let Some(id) = self.locked {
            debug!(
                "Rolling back portfolio {} ({} staged trades discarded)",
                id,
                self.staged_trades.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::OrderSide;
    use rust_decimal_macros::dec;

    async fn store_with_portfolio() -> (InMemoryLedgerStore, Portfolio) {
        let store = InMemoryLedgerStore::new();
        let portfolio = store.get_or_create_portfolio("alice", dec!(10000)).await.unwrap();
        (store, portfolio)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (store, portfolio) = store_with_portfolio().await;
        let again = store.get_or_create_portfolio("alice", dec!(1)).await.unwrap();
        assert_eq!(again.id, portfolio.id);
        assert_eq!(again.balance, dec!(10000));
    }

    #[tokio::test]
    async fn test_second_lock_fails_immediately() {
        let (store, portfolio) = store_with_portfolio().await;

        let mut first = store.begin().await.unwrap();
        first.lock_portfolio_for_update(portfolio.id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_portfolio_for_update(portfolio.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));

        first.rollback().await.unwrap();
        assert!(second.lock_portfolio_for_update(portfolio.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let (store, portfolio) = store_with_portfolio().await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_portfolio_for_update(portfolio.id).await.unwrap();
        let position = tx
            .upsert_position(&Position::open(portfolio.id, "AAPL", dec!(10), dec!(100)))
            .await
            .unwrap();
        tx.insert_trade(&Trade::pending(
            portfolio.id,
            "AAPL",
            OrderSide::Buy,
            dec!(10),
            dec!(100),
            dec!(0),
            None,
        ))
        .await
        .unwrap();
        locked.balance = dec!(9000);
        tx.update_portfolio(&locked).await.unwrap();

        // Transaction sees its own writes, the store does not
        assert_eq!(tx.open_positions(portfolio.id).await.unwrap().len(), 1);
        assert!(store.find_position(position.id).await.unwrap().is_none());
        assert_eq!(store.trade_count().await, 0);

        tx.commit().await.unwrap();

        assert_eq!(store.open_positions(portfolio.id).await.unwrap().len(), 1);
        assert_eq!(store.trades(portfolio.id).await.unwrap().len(), 1);
        let committed = store.find_portfolio(portfolio.id).await.unwrap().unwrap();
        assert_eq!(committed.balance, dec!(9000));
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_state_untouched() {
        let (store, portfolio) = store_with_portfolio().await;
        store.fail_next(FailurePoint::UpdatePortfolio, "disk full").await;

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_portfolio_for_update(portfolio.id).await.unwrap();
        tx.insert_trade(&Trade::pending(
            portfolio.id,
            "AAPL",
            OrderSide::Buy,
            dec!(1),
            dec!(100),
            dec!(0),
            None,
        ))
        .await
        .unwrap();
        let err = tx.update_portfolio(&locked).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
        tx.rollback().await.unwrap();

        assert_eq!(store.trade_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_lock() {
        let (store, portfolio) = store_with_portfolio().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_portfolio_for_update(portfolio.id).await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_portfolio_for_update(portfolio.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_unknown_portfolio() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.lock_portfolio_for_update(42).await.unwrap_err();
        assert!(matches!(err, StoreError::PortfolioNotFound { portfolio_id: 42 }));
    }
}
