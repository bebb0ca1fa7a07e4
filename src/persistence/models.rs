//! Row types for both ledger schema generations.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

use crate::domain::entities::order::OrderSide;
use crate::domain::services::pnl::Fill;

/// Legacy paper/live ledger row written by the trading loop. Quantity is
/// signed (positive buy, negative sell) and `proceeds` is the signed cash
/// flow, so summing either column gives the net figure directly.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LegacyTradeRow {
    pub acct_id: String,
    pub symbol: String,
    pub trade_datetime: NaiveDateTime,
    pub exchange: String,
    pub signal: String,
    pub trade_type: String,
    pub quantity: f64,
    pub price: f64,
    pub proceeds: f64,
    pub commission: f64,
    pub fee: f64,
    pub order_type: String,
    /// `O` for opening trades, `C` for closing trades.
    pub code: String,
}

/// Exchange order-history row mirroring the WOOX order payload, keyed by
/// `order_id`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExchangeOrderRow {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub order_type: String,
    pub order_price: f64,
    pub order_quantity: f64,
    pub order_amount: f64,
    pub side: String,
    pub status: String,
    pub created_time: NaiveDateTime,
    pub updated_time: NaiveDateTime,
    pub executed_quantity: f64,
    pub executed_price: f64,
    pub fee: f64,
    pub fee_asset: Option<String>,
    pub total_fee: f64,
    pub visible_quantity: f64,
    pub average_executed_price: f64,
    pub realized_pnl: f64,
    pub trigger_price: f64,
    pub reduce_only: bool,
    pub order_tag: Option<String>,
    pub exchange: String,
}

/// A trade record from either schema generation.
#[derive(Debug, Clone)]
pub enum TradeRecord {
    Legacy(LegacyTradeRow),
    Exchange(ExchangeOrderRow),
}

impl TradeRecord {
    /// Normalize into a fill for FIFO replay. Exchange rows only count when
    /// FILLED with executed quantity; legacy rows derive side from the sign
    /// of the stored quantity.
    pub fn fill(&self) -> Option<Fill> {
        match self {
            TradeRecord::Legacy(row) => {
                if row.quantity == 0.0 {
                    return None;
                }
                let side = if row.quantity > 0.0 {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                };
                Some(Fill::new(side, row.quantity.abs(), row.price))
            }
            TradeRecord::Exchange(row) => {
                if row.status != "FILLED" || row.executed_quantity <= 0.0 {
                    return None;
                }
                let side = OrderSide::from_str_loose(&row.side)?;
                let price = if row.average_executed_price > 0.0 {
                    row.average_executed_price
                } else {
                    row.executed_price
                };
                Some(Fill::new(side, row.executed_quantity, price))
            }
        }
    }
}
