use crate::domain::errors::StoreError;
use crate::domain::repositories::{LedgerStore, LedgerTransaction, StoreResult};
use crate::domain::trading::portfolio::{Portfolio, Position};
use crate::domain::trading::types::{ExitReason, PortfolioId, PositionId, Trade};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::repositories::PortfolioLocks;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// SQLite-backed ledger store.
///
/// Decimals are stored as TEXT, timestamps as INTEGER milliseconds.
///
/// The portfolio lock is a process-local per-portfolio mutex taken without
/// waiting. SQLite's database-wide write lock is only taken at the first write
/// of a transaction and held until commit, so trades on different portfolios
/// serialize on the short write phase instead of failing each other.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
    ledger_pool: SqlitePool,
    locks: PortfolioLocks,
}

impl SqliteLedgerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool.clone(),
            ledger_pool: db.ledger_pool.clone(),
            locks: PortfolioLocks::new(),
        }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(SqliteLedgerTransaction {
            pool: self.ledger_pool.clone(),
            locks: self.locks.clone(),
            tx: None,
            guard: None,
            locked: None,
        }))
    }

    async fn find_portfolio(&self, id: PortfolioId) -> StoreResult<Option<Portfolio>> {
        let row = sqlx::query("SELECT * FROM portfolios WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_portfolio).transpose()
    }

    async fn get_or_create_portfolio(
        &self,
        owner: &str,
        initial_balance: Decimal,
    ) -> StoreResult<Portfolio> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO portfolios (owner, balance, total_value, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(owner) DO NOTHING
            "#,
        )
        .bind(owner)
        .bind(initial_balance.to_string())
        .bind(initial_balance.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Created portfolio for {} with balance {}", owner, initial_balance);
        }

        let row = sqlx::query("SELECT * FROM portfolios WHERE owner = ?")
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;
        map_portfolio(&row)
    }

    async fn open_positions(&self, portfolio_id: PortfolioId) -> StoreResult<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE portfolio_id = ? AND status = 'open' ORDER BY id",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_position).collect()
    }

    async fn all_open_positions(&self) -> StoreResult<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'open' ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_position).collect()
    }

    async fn find_position(&self, id: PositionId) -> StoreResult<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_position).transpose()
    }

    async fn trades(&self, portfolio_id: PortfolioId) -> StoreResult<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE portfolio_id = ? ORDER BY id")
            .bind(portfolio_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_trade).collect()
    }
}

pub struct SqliteLedgerTransaction {
    pool: SqlitePool,
    locks: PortfolioLocks,
    /// Opened at the first write
    tx: Option<Transaction<'static, Sqlite>>,
    guard: Option<OwnedMutexGuard<()>>,
    locked: Option<PortfolioId>,
}

impl SqliteLedgerTransaction {
    /// The write transaction, opened on first use.
    ///
    /// Its first statement bumps `lock_version` of the locked portfolio, which
    /// takes SQLite's write lock; a busy database waits out the ledger pool's
    /// busy timeout and then fails as `Locked`.
    async fn writer(&mut self) -> StoreResult<&mut Transaction<'static, Sqlite>> {
        if self.tx.is_none() {
            let mut tx = self.pool.begin().await?;
            if let Some(id) = self.locked {
                sqlx::query("UPDATE portfolios SET lock_version = lock_version + 1 WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_lock_error(e, id))?;
            }
            self.tx = Some(tx);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Backend("write transaction not open".to_string()))
    }
}

#[async_trait]
impl LedgerTransaction for SqliteLedgerTransaction {
    async fn lock_portfolio_for_update(&mut self, id: PortfolioId) -> StoreResult<Portfolio> {
        if self.locked.is_some_and(|held| held != id) {
            return Err(StoreError::Backend(
                "transaction already holds another portfolio lock".to_string(),
            ));
        }
        if self.guard.is_none() {
            self.guard = Some(self.locks.try_acquire(id).await?);
        }

        let query = sqlx::query("SELECT * FROM portfolios WHERE id = ?").bind(id);
        let row = match self.tx.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        let Some(row) = row else {
            self.guard = None;
            return Err(StoreError::PortfolioNotFound { portfolio_id: id });
        };
        self.locked = Some(id);
        map_portfolio(&row)
    }

    async fn open_positions(&mut self, portfolio_id: PortfolioId) -> StoreResult<Vec<Position>> {
        let query = sqlx::query(
            "SELECT * FROM positions WHERE portfolio_id = ? AND status = 'open' ORDER BY id",
        )
        .bind(portfolio_id);
        let rows = match self.tx.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(&self.pool).await?,
        };
        rows.iter().map(map_position).collect()
    }

    async fn find_position(&mut self, id: PositionId) -> StoreResult<Option<Position>> {
        let query = sqlx::query("SELECT * FROM positions WHERE id = ?").bind(id);
        let row = match self.tx.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        row.as_ref().map(map_position).transpose()
    }

    async fn upsert_position(&mut self, position: &Position) -> StoreResult<Position> {
        let tx = self.writer().await?;
        let mut saved = position.clone();
        if position.id == 0 {
            let result = sqlx::query(
                r#"
                INSERT INTO positions (
                    portfolio_id, symbol, quantity, average_price, current_price,
                    stop_loss_price, take_profit_price, trailing_stop_pct, status,
                    exit_price, exit_date, exit_reason, opened_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(position.portfolio_id)
            .bind(&position.symbol)
            .bind(position.quantity.to_string())
            .bind(position.average_price.to_string())
            .bind(position.current_price.to_string())
            .bind(position.stop_loss_price.map(|d| d.to_string()))
            .bind(position.take_profit_price.map(|d| d.to_string()))
            .bind(position.trailing_stop_pct.map(|d| d.to_string()))
            .bind(position.status.as_str())
            .bind(position.exit_price.map(|d| d.to_string()))
            .bind(position.exit_date.map(|d| d.timestamp_millis()))
            .bind(position.exit_reason.map(|r| r.as_str()))
            .bind(position.opened_at.timestamp_millis())
            .bind(position.updated_at.timestamp_millis())
            .execute(&mut **tx)
            .await?;
            saved.id = result.last_insert_rowid();
        } else {
            let result = sqlx::query(
                r#"
                UPDATE positions SET
                    quantity = ?, average_price = ?, current_price = ?,
                    stop_loss_price = ?, take_profit_price = ?, trailing_stop_pct = ?,
                    status = ?, exit_price = ?, exit_date = ?, exit_reason = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(position.quantity.to_string())
            .bind(position.average_price.to_string())
            .bind(position.current_price.to_string())
            .bind(position.stop_loss_price.map(|d| d.to_string()))
            .bind(position.take_profit_price.map(|d| d.to_string()))
            .bind(position.trailing_stop_pct.map(|d| d.to_string()))
            .bind(position.status.as_str())
            .bind(position.exit_price.map(|d| d.to_string()))
            .bind(position.exit_date.map(|d| d.timestamp_millis()))
            .bind(position.exit_reason.map(|r| r.as_str()))
            .bind(position.updated_at.timestamp_millis())
            .bind(position.id)
            .execute(&mut **tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::PositionNotFound {
                    position_id: position.id,
                });
            }
        }
        Ok(saved)
    }

    async fn insert_trade(&mut self, trade: &Trade) -> StoreResult<Trade> {
        let tx = self.writer().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO trades (portfolio_id, symbol, side, quantity, price, commission, pnl, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.portfolio_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.quantity.to_string())
        .bind(trade.price.to_string())
        .bind(trade.commission.to_string())
        .bind(trade.pnl.map(|d| d.to_string()))
        .bind(trade.timestamp.timestamp_millis())
        .execute(&mut **tx)
        .await?;

        let mut saved = trade.clone();
        saved.id = result.last_insert_rowid();
        Ok(saved)
    }

    async fn update_portfolio(&mut self, portfolio: &Portfolio) -> StoreResult<()> {
        if self.locked != Some(portfolio.id) {
            warn!(
                "Portfolio {} updated without holding its lock in this transaction",
                portfolio.id
            );
        }
        let tx = self.writer().await?;
        sqlx::query(
            "UPDATE portfolios SET balance = ?, total_value = ?, updated_at = ? WHERE id = ?",
        )
        .bind(portfolio.balance.to_string())
        .bind(portfolio.total_value.to_string())
        .bind(portfolio.updated_at.timestamp_millis())
        .bind(portfolio.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        // Release the portfolio lock only after the writes are visible
        self.guard.take();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED and their extended codes.
fn is_lock_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let busy_code = db
                .code()
                .is_some_and(|code| matches!(&*code, "5" | "6" | "261" | "262" | "517"));
            busy_code || db.message().contains("locked")
        }
        _ => false,
    }
}

fn map_lock_error(err: sqlx::Error, portfolio_id: PortfolioId) -> StoreError {
    if is_lock_contention(&err) {
        StoreError::Locked { portfolio_id }
    } else {
        err.into()
    }
}

fn decimal(row: &SqliteRow, column: &str) -> StoreResult<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw)
        .map_err(|e| StoreError::Backend(format!("invalid decimal in {}: {} ({})", column, raw, e)))
}

fn optional_decimal(row: &SqliteRow, column: &str) -> StoreResult<Option<Decimal>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|r| {
        Decimal::from_str(&r)
            .map_err(|e| StoreError::Backend(format!("invalid decimal in {}: {} ({})", column, r, e)))
    })
    .transpose()
}

fn timestamp(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Backend(format!("invalid timestamp {}", millis)))
}

fn parse_enum<T: FromStr<Err = anyhow::Error>>(raw: &str) -> StoreResult<T> {
    T::from_str(raw).map_err(|e| StoreError::Backend(e.to_string()))
}

fn map_portfolio(row: &SqliteRow) -> StoreResult<Portfolio> {
    Ok(Portfolio {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        balance: decimal(row, "balance")?,
        total_value: decimal(row, "total_value")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

fn map_position(row: &SqliteRow) -> StoreResult<Position> {
    let status: String = row.try_get("status")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let exit_date: Option<i64> = row.try_get("exit_date")?;

    Ok(Position {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        symbol: row.try_get("symbol")?,
        quantity: decimal(row, "quantity")?,
        average_price: decimal(row, "average_price")?,
        current_price: decimal(row, "current_price")?,
        stop_loss_price: optional_decimal(row, "stop_loss_price")?,
        take_profit_price: optional_decimal(row, "take_profit_price")?,
        trailing_stop_pct: optional_decimal(row, "trailing_stop_pct")?,
        status: parse_enum(&status)?,
        exit_price: optional_decimal(row, "exit_price")?,
        exit_date: exit_date.map(timestamp).transpose()?,
        exit_reason: exit_reason.as_deref().map(parse_enum::<ExitReason>).transpose()?,
        opened_at: timestamp(row.try_get("opened_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

fn map_trade(row: &SqliteRow) -> StoreResult<Trade> {
    let side: String = row.try_get("side")?;
    Ok(Trade {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        symbol: row.try_get("symbol")?,
        side: parse_enum(&side)?,
        quantity: decimal(row, "quantity")?,
        price: decimal(row, "price")?,
        commission: decimal(row, "commission")?,
        pnl: optional_decimal(row, "pnl")?,
        timestamp: timestamp(row.try_get("timestamp")?)?,
    })
}
