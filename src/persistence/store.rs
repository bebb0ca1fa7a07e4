//! Ledger reads and writes.
//!
//! Summary statistics adapt to whichever schema generation is on disk:
//! direct SQL aggregates with signal-label win/loss counts for the legacy
//! ledger, FIFO replay of FILLED orders for the exchange schema. Readers
//! treat a missing trades table as an empty ledger so the dashboard can run
//! before the first trade.

use serde::Serialize;
use tracing::warn;

use crate::domain::services::pnl::{Fill, FifoReplay};
use crate::persistence::models::{ExchangeOrderRow, LegacyTradeRow, TradeRecord};
use crate::persistence::{DatabaseError, DbPool};

#[derive(Debug, Clone)]
pub struct TransactionStore {
    pool: DbPool,
}

/// Aggregate view of the ledger for the dashboard and sizing logic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: i64,
    pub buy_count: i64,
    pub buy_quantity: f64,
    pub buy_proceeds: f64,
    pub sell_count: i64,
    pub sell_quantity: f64,
    pub sell_proceeds: f64,
    /// Realized PnL (cash flow for the legacy schema).
    pub cash_pnl: f64,
    pub unrealized_pnl: f64,
    /// Realized plus unrealized.
    pub net_pnl: f64,
    /// Residual quantity, signed.
    pub net_quantity: f64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub peak_pnl: f64,
    pub recent_trades: Vec<RecentTrade>,
}

/// One row of the recent-trades feed, schema-agnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RecentTrade {
    pub time: chrono::NaiveDateTime,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub label: String,
}

/// Net holding per symbol derived from the legacy ledger.
#[derive(Debug, Clone, Serialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub trade_count: i64,
}

fn is_missing_table(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.message().contains("no such table"),
        _ => false,
    }
}

impl TransactionStore {
    pub fn new(pool: DbPool) -> Self {
        TransactionStore { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Append one legacy ledger row.
    pub async fn record_trade(&self, row: &LegacyTradeRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                acct_id, symbol, trade_datetime, exchange, signal, trade_type,
                quantity, price, proceeds, commission, fee, order_type, code
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.acct_id)
        .bind(&row.symbol)
        .bind(row.trade_datetime)
        .bind(&row.exchange)
        .bind(&row.signal)
        .bind(&row.trade_type)
        .bind(row.quantity)
        .bind(row.price)
        .bind(row.proceeds)
        .bind(row.commission)
        .bind(row.fee)
        .bind(&row.order_type)
        .bind(&row.code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace an exchange order row, keyed by order id. Safe to
    /// re-run over the same history window.
    pub async fn upsert_order(&self, row: &ExchangeOrderRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO trades (
                order_id, client_order_id, symbol, order_type, order_price,
                order_quantity, order_amount, side, status, created_time,
                updated_time, executed_quantity, executed_price, fee, fee_asset,
                total_fee, visible_quantity, average_executed_price,
                realized_pnl, trigger_price, reduce_only, order_tag, exchange
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.order_id)
        .bind(&row.client_order_id)
        .bind(&row.symbol)
        .bind(&row.order_type)
        .bind(row.order_price)
        .bind(row.order_quantity)
        .bind(row.order_amount)
        .bind(&row.side)
        .bind(&row.status)
        .bind(row.created_time)
        .bind(row.updated_time)
        .bind(row.executed_quantity)
        .bind(row.executed_price)
        .bind(row.fee)
        .bind(&row.fee_asset)
        .bind(row.total_fee)
        .bind(row.visible_quantity)
        .bind(row.average_executed_price)
        .bind(row.realized_pnl)
        .bind(row.trigger_price)
        .bind(row.reduce_only)
        .bind(&row.order_tag)
        .bind(&row.exchange)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether the trades table carries the exchange order schema. False
    /// when the table is legacy or absent.
    pub async fn has_exchange_schema(&self) -> Result<bool, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pragma_table_info('trades') WHERE name = 'order_id'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Performance summary, dispatching on the on-disk schema. A missing
    /// trades table yields an empty summary.
    pub async fn summary(
        &self,
        current_price: Option<f64>,
    ) -> Result<PerformanceSummary, DatabaseError> {
        let result = if self.has_exchange_schema().await? {
            self.summary_exchange(current_price).await
        } else {
            self.summary_legacy(current_price).await
        };
        match result {
            Err(DatabaseError::Connection(e)) if is_missing_table(&e) => {
                Ok(PerformanceSummary::default())
            }
            other => other,
        }
    }

    async fn summary_legacy(
        &self,
        current_price: Option<f64>,
    ) -> Result<PerformanceSummary, DatabaseError> {
        let (total_trades,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades")
            .fetch_one(&self.pool)
            .await?;

        let (buy_count, buy_quantity, buy_proceeds): (i64, Option<f64>, Option<f64>) =
            sqlx::query_as(
                "SELECT COUNT(*), SUM(quantity), SUM(proceeds) FROM trades WHERE trade_type = 'BUY'",
            )
            .fetch_one(&self.pool)
            .await?;

        let (sell_count, sell_quantity, sell_proceeds): (i64, Option<f64>, Option<f64>) =
            sqlx::query_as(
                "SELECT COUNT(*), SUM(ABS(quantity)), SUM(proceeds) FROM trades WHERE trade_type = 'SELL'",
            )
            .fetch_one(&self.pool)
            .await?;

        let (cash_pnl,): (Option<f64>,) = sqlx::query_as("SELECT SUM(proceeds) FROM trades")
            .fetch_one(&self.pool)
            .await?;
        let cash_pnl = cash_pnl.unwrap_or(0.0);

        let (net_quantity,): (Option<f64>,) = sqlx::query_as("SELECT SUM(quantity) FROM trades")
            .fetch_one(&self.pool)
            .await?;
        let net_quantity = net_quantity.unwrap_or(0.0);

        // Mark-to-market: the cash flow already includes the cost of the
        // open residual, so adding its current value gives the account PnL.
        // The unrealized figure is measured against the residual's cost
        // basis, reconstructed by replaying the ledger.
        let (net_pnl, unrealized_pnl) = match current_price {
            Some(price) if net_quantity != 0.0 => {
                let rows: Vec<LegacyTradeRow> =
                    sqlx::query_as("SELECT * FROM trades ORDER BY trade_datetime ASC")
                        .fetch_all(&self.pool)
                        .await?;
                let fills: Vec<Fill> = rows
                    .iter()
                    .filter_map(|row| TradeRecord::Legacy(row.clone()).fill())
                    .collect();
                let replay = FifoReplay::replay(&fills);
                (cash_pnl + net_quantity * price, replay.unrealized_pnl(price))
            }
            _ => (cash_pnl, 0.0),
        };

        let (winning_trades,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trades WHERE signal = 'TAKE_PROFIT'")
                .fetch_one(&self.pool)
                .await?;
        let (losing_trades,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trades WHERE signal = 'STOP_LOSS'")
                .fetch_one(&self.pool)
                .await?;

        let recent: Vec<LegacyTradeRow> =
            sqlx::query_as("SELECT * FROM trades ORDER BY trade_datetime DESC LIMIT 10")
                .fetch_all(&self.pool)
                .await?;
        let recent_trades = recent
            .into_iter()
            .map(|row| RecentTrade {
                time: row.trade_datetime,
                symbol: row.symbol,
                side: row.trade_type,
                quantity: row.quantity,
                price: row.price,
                label: row.signal,
            })
            .collect();

        Ok(PerformanceSummary {
            total_trades,
            buy_count,
            buy_quantity: buy_quantity.unwrap_or(0.0),
            buy_proceeds: buy_proceeds.unwrap_or(0.0),
            sell_count,
            sell_quantity: sell_quantity.unwrap_or(0.0),
            sell_proceeds: sell_proceeds.unwrap_or(0.0),
            cash_pnl,
            unrealized_pnl,
            net_pnl,
            net_quantity,
            winning_trades,
            losing_trades,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            peak_pnl: cash_pnl.max(0.0),
            recent_trades,
        })
    }

    async fn summary_exchange(
        &self,
        current_price: Option<f64>,
    ) -> Result<PerformanceSummary, DatabaseError> {
        let (total_trades,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trades WHERE status = 'FILLED'")
                .fetch_one(&self.pool)
                .await?;

        let (buy_count, buy_quantity, buy_value): (i64, Option<f64>, Option<f64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(executed_quantity),
                   SUM(executed_quantity * average_executed_price)
            FROM trades WHERE side = 'BUY' AND status = 'FILLED'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (sell_count, sell_quantity, sell_value): (i64, Option<f64>, Option<f64>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*), SUM(executed_quantity),
                       SUM(executed_quantity * average_executed_price)
                FROM trades WHERE side = 'SELL' AND status = 'FILLED'
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        // Replay fills oldest-first to reconstruct realized PnL; the
        // exchange's per-order realized_pnl field is not trusted because
        // partial histories miss the opening legs.
        let rows: Vec<ExchangeOrderRow> = sqlx::query_as(
            "SELECT * FROM trades WHERE status = 'FILLED' ORDER BY updated_time ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let fills: Vec<Fill> = rows
            .iter()
            .filter_map(|row| TradeRecord::Exchange(row.clone()).fill())
            .collect();
        let replay = FifoReplay::replay(&fills);

        let unrealized_pnl = current_price
            .map(|price| replay.unrealized_pnl(price))
            .unwrap_or(0.0);

        let recent: Vec<ExchangeOrderRow> = sqlx::query_as(
            "SELECT * FROM trades WHERE status = 'FILLED' ORDER BY updated_time DESC LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await?;
        let recent_trades = recent
            .into_iter()
            .map(|row| {
                let price = if row.average_executed_price > 0.0 {
                    row.average_executed_price
                } else {
                    row.executed_price
                };
                RecentTrade {
                    time: row.updated_time,
                    symbol: row.symbol,
                    side: row.side,
                    quantity: row.executed_quantity,
                    price,
                    label: row.status,
                }
            })
            .collect();

        Ok(PerformanceSummary {
            total_trades,
            buy_count,
            buy_quantity: buy_quantity.unwrap_or(0.0),
            buy_proceeds: -buy_value.unwrap_or(0.0),
            sell_count,
            sell_quantity: sell_quantity.unwrap_or(0.0),
            sell_proceeds: sell_value.unwrap_or(0.0),
            cash_pnl: replay.realized_pnl,
            unrealized_pnl,
            net_pnl: replay.realized_pnl + unrealized_pnl,
            net_quantity: replay.net_quantity,
            winning_trades: replay.winning_trades as i64,
            losing_trades: replay.losing_trades as i64,
            sharpe_ratio: replay.sharpe_ratio(),
            max_drawdown: replay.max_drawdown(),
            peak_pnl: replay.peak_pnl(),
            recent_trades,
        })
    }

    /// Net holdings by symbol from the legacy ledger. Empty for the
    /// exchange schema or when the table is missing.
    pub async fn open_positions(&self) -> Result<Vec<OpenPosition>, DatabaseError> {
        let result: Result<Vec<(String, f64, f64, i64)>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT symbol, SUM(quantity), AVG(price), COUNT(*)
            FROM trades
            GROUP BY symbol
            HAVING SUM(quantity) != 0
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|(symbol, quantity, avg_entry_price, trade_count)| OpenPosition {
                    symbol,
                    quantity,
                    avg_entry_price,
                    trade_count,
                })
                .collect()),
            Err(e) => {
                warn!("Open position query failed, returning empty: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{create_exchange_schema, run_migrations};
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn legacy_store() -> TransactionStore {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
        TransactionStore::new(pool)
    }

    fn at(minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    }

    fn legacy_row(
        symbol: &str,
        minute: u32,
        signal: &str,
        trade_type: &str,
        quantity: f64,
        price: f64,
        code: &str,
    ) -> LegacyTradeRow {
        LegacyTradeRow {
            acct_id: "paper".into(),
            symbol: symbol.into(),
            trade_datetime: at(minute),
            exchange: "woox".into(),
            signal: signal.into(),
            trade_type: trade_type.into(),
            quantity,
            price,
            proceeds: -quantity * price,
            commission: 0.0,
            fee: 0.0,
            order_type: "LMT".into(),
            code: code.into(),
        }
    }

    fn order_row(id: &str, minute: u32, side: &str, status: &str, qty: f64, price: f64) -> ExchangeOrderRow {
        ExchangeOrderRow {
            order_id: id.into(),
            client_order_id: None,
            symbol: "PERP_BTC_USDT".into(),
            order_type: "LIMIT".into(),
            order_price: price,
            order_quantity: qty,
            order_amount: 0.0,
            side: side.into(),
            status: status.into(),
            created_time: at(minute),
            updated_time: at(minute),
            executed_quantity: qty,
            executed_price: price,
            fee: 0.0,
            fee_asset: None,
            total_fee: 0.0,
            visible_quantity: qty,
            average_executed_price: price,
            realized_pnl: 0.0,
            trigger_price: 0.0,
            reduce_only: false,
            order_tag: None,
            exchange: "woox".into(),
        }
    }

    #[tokio::test]
    async fn test_missing_table_is_empty_summary() {
        let store = TransactionStore::new(memory_pool().await);
        assert!(!store.has_exchange_schema().await.unwrap());
        let summary = store.summary(Some(100.0)).await.unwrap();
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.net_pnl, 0.0);
        assert!(store.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_round_trip_summary() {
        let store = legacy_store().await;
        // Open long 0.002 @ 50000, close at 51500 for take profit.
        store
            .record_trade(&legacy_row(
                "SPOT_BTC_USDT", 0, "MA_CROSS", "BUY", 0.002, 50000.0, "O",
            ))
            .await
            .unwrap();
        store
            .record_trade(&legacy_row(
                "SPOT_BTC_USDT", 5, "TAKE_PROFIT", "SELL", -0.002, 51500.0, "C",
            ))
            .await
            .unwrap();

        let summary = store.summary(None).await.unwrap();
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.buy_count, 1);
        assert_eq!(summary.sell_count, 1);
        assert!((summary.cash_pnl - 3.0).abs() < 1e-9);
        assert_eq!(summary.net_pnl, summary.cash_pnl);
        assert!((summary.net_quantity).abs() < 1e-12);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 0);
        assert_eq!(summary.recent_trades.len(), 2);
        // Newest first.
        assert_eq!(summary.recent_trades[0].label, "TAKE_PROFIT");
    }

    #[tokio::test]
    async fn test_legacy_mark_to_market_residual() {
        let store = legacy_store().await;
        store
            .record_trade(&legacy_row(
                "SPOT_BTC_USDT", 0, "MA_CROSS", "BUY", 1.0, 100.0, "O",
            ))
            .await
            .unwrap();

        let summary = store.summary(Some(110.0)).await.unwrap();
        assert_eq!(summary.cash_pnl, -100.0);
        assert_eq!(summary.net_quantity, 1.0);
        assert_eq!(summary.net_pnl, 10.0);
        // Unrealized is measured against the 100 entry, not the full value.
        assert_eq!(summary.unrealized_pnl, 10.0);
    }

    #[tokio::test]
    async fn test_open_positions_grouping() {
        let store = legacy_store().await;
        store
            .record_trade(&legacy_row("SPOT_BTC_USDT", 0, "MA_CROSS", "BUY", 1.0, 100.0, "O"))
            .await
            .unwrap();
        store
            .record_trade(&legacy_row("SPOT_BTC_USDT", 1, "TAKE_PROFIT", "SELL", -1.0, 110.0, "C"))
            .await
            .unwrap();
        store
            .record_trade(&legacy_row("SPOT_ETH_USDT", 2, "MA_CROSS", "BUY", 2.0, 50.0, "O"))
            .await
            .unwrap();

        let positions = store.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "SPOT_ETH_USDT");
        assert_eq!(positions[0].quantity, 2.0);
        assert_eq!(positions[0].avg_entry_price, 50.0);
    }

    #[tokio::test]
    async fn test_exchange_schema_fifo_summary() {
        let pool = memory_pool().await;
        create_exchange_schema(&pool).await.unwrap();
        let store = TransactionStore::new(pool);
        assert!(store.has_exchange_schema().await.unwrap());

        store
            .upsert_order(&order_row("a", 0, "BUY", "FILLED", 1.0, 100.0))
            .await
            .unwrap();
        store
            .upsert_order(&order_row("b", 1, "SELL", "FILLED", 1.0, 110.0))
            .await
            .unwrap();
        store
            .upsert_order(&order_row("c", 2, "BUY", "CANCELLED", 1.0, 105.0))
            .await
            .unwrap();
        // Re-upserting the same order id must not double-count.
        store
            .upsert_order(&order_row("b", 1, "SELL", "FILLED", 1.0, 110.0))
            .await
            .unwrap();

        let summary = store.summary(None).await.unwrap();
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.buy_count, 1);
        assert_eq!(summary.sell_count, 1);
        assert_eq!(summary.cash_pnl, 10.0);
        assert_eq!(summary.net_pnl, 10.0);
        assert_eq!(summary.net_quantity, 0.0);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 0);
        assert_eq!(summary.recent_trades.len(), 2);
    }

    #[tokio::test]
    async fn test_exchange_schema_unrealized_residual() {
        let pool = memory_pool().await;
        create_exchange_schema(&pool).await.unwrap();
        let store = TransactionStore::new(pool);

        store
            .upsert_order(&order_row("a", 0, "BUY", "FILLED", 2.0, 100.0))
            .await
            .unwrap();
        store
            .upsert_order(&order_row("b", 1, "SELL", "FILLED", 1.0, 110.0))
            .await
            .unwrap();

        let summary = store.summary(Some(120.0)).await.unwrap();
        assert_eq!(summary.cash_pnl, 10.0);
        assert_eq!(summary.net_quantity, 1.0);
        assert_eq!(summary.unrealized_pnl, 20.0);
        assert_eq!(summary.net_pnl, 30.0);
    }
}
