//! Abstract exchange access. The production implementation signs WOOX REST
//! calls; tests substitute mocks.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::entities::order::OrderRequest;
use crate::domain::errors::ExchangeError;
use crate::domain::market_state::OrderbookLevel;

/// Raw book levels as returned by the exchange, best first.
#[derive(Debug, Clone, Default)]
pub struct OrderbookLevels {
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub timestamp: Option<f64>,
}

/// One public market trade (an execution, not an order).
#[derive(Debug, Clone, Copy)]
pub struct MarketTrade {
    pub price: f64,
    pub quantity: f64,
}

/// Spot wallet balance for one token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBalance {
    pub token: String,
    pub holding: f64,
    pub average_open_price: Option<f64>,
}

/// Perp position as reported by the exchange. Holding is signed: positive
/// long, negative short.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub holding: f64,
    pub average_open_price: f64,
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccountInfo {
    pub total_collateral: f64,
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_orderbook(
        &self,
        symbol: &str,
        max_level: u32,
    ) -> Result<OrderbookLevels, ExchangeError>;

    async fn get_market_trades(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<MarketTrade>, ExchangeError>;

    async fn get_balances(&self) -> Result<Vec<TokenBalance>, ExchangeError>;

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;

    async fn get_account_info(&self) -> Result<AccountInfo, ExchangeError>;

    /// Places the order and returns the exchange order id.
    async fn place_order(&self, order: &OrderRequest) -> Result<String, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;
}
