//! Ledger Store Abstractions
//!
//! The ledger engine depends only on these traits, never on a concrete
//! database.
//!
//! # Design
//!
//! - `LedgerStore`: read access plus the ability to open a transaction
//! - `LedgerTransaction`: a unit of work against exactly one portfolio
//!
//! Every mutation happens inside a transaction whose first call is
//! `lock_portfolio_for_update`. The lock is non-blocking: when another
//! transaction already holds it the call fails with `StoreError::Locked`
//! instead of waiting. Reads made through the transaction observe its own
//! staged writes. Dropping a transaction without committing rolls it back.
//!
//! # Implementations
//!
//! - `SqliteLedgerStore`: sqlx/SQLite, per-portfolio `try_lock`, write transaction opened at the first write
//! - `InMemoryLedgerStore`: per-portfolio `try_lock`, staged writes, failure injection

use crate::domain::errors::StoreError;
use crate::domain::trading::portfolio::{Portfolio, Position};
use crate::domain::trading::types::{PortfolioId, PositionId, Trade};
use async_trait::async_trait;
use rust_decimal::Decimal;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>>;

    async fn find_portfolio(&self, id: PortfolioId) -> StoreResult<Option<Portfolio>>;

    /// Return the owner's portfolio, creating it with `initial_balance` if absent.
    async fn get_or_create_portfolio(
        &self,
        owner: &str,
        initial_balance: Decimal,
    ) -> StoreResult<Portfolio>;

    async fn open_positions(&self, portfolio_id: PortfolioId) -> StoreResult<Vec<Position>>;

    /// Open positions across every portfolio (stop-loss sweep input).
    async fn all_open_positions(&self) -> StoreResult<Vec<Position>>;

    async fn find_position(&self, id: PositionId) -> StoreResult<Option<Position>>;

    /// Trades of a portfolio, oldest first.
    async fn trades(&self, portfolio_id: PortfolioId) -> StoreResult<Vec<Trade>>;
}

#[async_trait]
pub trait LedgerTransaction: Send {
    /// Take the exclusive portfolio lock without waiting.
    async fn lock_portfolio_for_update(&mut self, id: PortfolioId) -> StoreResult<Portfolio>;

    async fn open_positions(&mut self, portfolio_id: PortfolioId) -> StoreResult<Vec<Position>>;

    async fn find_position(&mut self, id: PositionId) -> StoreResult<Option<Position>>;

    /// Insert (id 0) or update a position, returning it with its id.
    async fn upsert_position(&mut self, position: &Position) -> StoreResult<Position>;

    /// Append a trade, returning it with its id.
    async fn insert_trade(&mut self, trade: &Trade) -> StoreResult<Trade>;

    async fn update_portfolio(&mut self, portfolio: &Portfolio) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
