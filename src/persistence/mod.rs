//! SQLite-backed transaction ledger.
//!
//! Two schema generations share the `trades` table name: the legacy signed
//! ledger written by the trading loop, and the exchange order schema written
//! by the order-history sync (keyed by `order_id`). The store detects the
//! schema at query time; other processes (dashboard, sync job) may hold
//! their own connections, so writes are insert/upsert only and readers treat
//! a missing table as an empty ledger.

pub mod models;
pub mod store;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

pub type DbPool = SqlitePool;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

/// Open (creating if missing) the ledger database and ensure the legacy
/// trades table exists.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(DatabaseError::Connection)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    info!("Database initialized: {}", database_url);
    Ok(pool)
}

/// Create the legacy trades table when no trades table exists yet. A no-op
/// when either schema generation is already present.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            acct_id TEXT,
            symbol TEXT,
            trade_datetime TIMESTAMP,
            exchange TEXT,
            signal TEXT,
            trade_type TEXT,
            quantity REAL,
            price REAL,
            proceeds REAL,
            commission REAL,
            fee REAL,
            order_type TEXT,
            code TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    Ok(())
}

/// Create the exchange order-history schema, replacing any legacy table.
/// Used by the order sync; `order_id` is the upsert key.
pub async fn create_exchange_schema(pool: &DbPool) -> Result<(), DatabaseError> {
    sqlx::query("DROP TABLE IF EXISTS trades")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            order_id TEXT PRIMARY KEY,
            client_order_id TEXT,
            symbol TEXT,
            order_type TEXT,
            order_price REAL,
            order_quantity REAL,
            order_amount REAL,
            side TEXT,
            status TEXT,
            created_time TIMESTAMP,
            updated_time TIMESTAMP,
            executed_quantity REAL,
            executed_price REAL,
            fee REAL,
            fee_asset TEXT,
            total_fee REAL,
            visible_quantity REAL,
            average_executed_price REAL,
            realized_pnl REAL,
            trigger_price REAL,
            reduce_only BOOLEAN,
            order_tag TEXT,
            exchange TEXT DEFAULT 'woox'
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    Ok(())
}
