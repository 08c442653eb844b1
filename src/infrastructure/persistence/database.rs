use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

pub const LEDGER_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Database wrapper holding two pools on the same file.
///
/// `pool` is for reads and the event log and waits on busy locks as usual.
/// `ledger_pool` runs ledger transactions with a short busy timeout: the
/// portfolio lock itself never waits, and the database write lock is only
/// queued for `LEDGER_BUSY_TIMEOUT` before the trade fails as contended.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
    pub ledger_pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.clone())
            .await
            .context("Failed to connect to SQLite database")?;

        let ledger_pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.busy_timeout(LEDGER_BUSY_TIMEOUT))
            .await
            .context("Failed to open ledger connection pool")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool, ledger_pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL UNIQUE,
                balance TEXT NOT NULL,
                total_value TEXT NOT NULL,
                lock_version INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create portfolios table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portfolio_id INTEGER NOT NULL REFERENCES portfolios(id),
                symbol TEXT NOT NULL,
                quantity TEXT NOT NULL,
                average_price TEXT NOT NULL,
                current_price TEXT NOT NULL,
                stop_loss_price TEXT,
                take_profit_price TEXT,
                trailing_stop_pct TEXT,
                status TEXT NOT NULL,
                exit_price TEXT,
                exit_date INTEGER,
                exit_reason TEXT,
                opened_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        // At most one open position per (portfolio, symbol)
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_open_symbol
            ON positions (portfolio_id, symbol) WHERE status = 'open';
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create open position index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portfolio_id INTEGER NOT NULL REFERENCES portfolios(id),
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                commission TEXT NOT NULL,
                pnl TEXT,
                timestamp INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_portfolio
            ON trades (portfolio_id, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trades index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domain_events (
                event_id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                source_aggregate_id TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                payload_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create domain_events table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
