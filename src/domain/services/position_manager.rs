//! Position lifecycle state machine: FLAT -> OPEN -> FLAT.
//!
//! At most one position exists per manager. A single async mutex serializes
//! every transition so concurrent auto-trade and manual-trade triggers can
//! never double-open. In live mode the exchange order is placed before local
//! state changes, so a rejected order leaves the machine untouched; in paper
//! mode fills are simulated. Local state is the sole truth in paper mode and
//! a cache of exchange state in live mode.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::TradeMode;
use crate::domain::entities::order::{OrderRequest, OrderSide};
use crate::domain::entities::position::{Position, Side};
use crate::domain::errors::PositionError;
use crate::domain::repositories::exchange_gateway::ExchangeGateway;
use crate::persistence::models::LegacyTradeRow;
use crate::persistence::store::TransactionStore;

/// Spot balances below this are treated as dust, not positions.
const DUST_THRESHOLD: f64 = 1e-4;

/// Outcome of a successful close, for logging and the control API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClosedPosition {
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub signal: &'static str,
}

pub struct PositionManager {
    symbol: String,
    mode: TradeMode,
    acct_id: String,
    stop_loss_pct: f64,
    gateway: Arc<dyn ExchangeGateway>,
    store: TransactionStore,
    position: Mutex<Option<Position>>,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl PositionManager {
    pub fn new(
        symbol: String,
        mode: TradeMode,
        acct_id: String,
        stop_loss_pct: f64,
        gateway: Arc<dyn ExchangeGateway>,
        store: TransactionStore,
    ) -> Self {
        PositionManager {
            symbol,
            mode,
            acct_id,
            stop_loss_pct,
            gateway,
            store,
            position: Mutex::new(None),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_spot(&self) -> bool {
        self.symbol.starts_with("SPOT_")
    }

    pub async fn current(&self) -> Option<Position> {
        self.position.lock().await.clone()
    }

    /// Open a position. Fails without side effects when one is already held,
    /// or when shorting a spot symbol.
    pub async fn open(
        &self,
        side: Side,
        price: f64,
        quantity: f64,
        signal: &str,
    ) -> Result<Position, PositionError> {
        let mut guard = self.position.lock().await;
        if guard.is_some() {
            warn!("Cannot open position - already holding a position");
            return Err(PositionError::AlreadyOpen);
        }
        if side == Side::Short && self.is_spot() {
            warn!("Short positions not supported for spot trading, use PERP_ symbols");
            return Err(PositionError::ShortNotSupported);
        }

        if self.mode == TradeMode::Live {
            let order_side = match side {
                Side::Long => OrderSide::Buy,
                Side::Short => OrderSide::Sell,
            };
            let order = OrderRequest::limit(&self.symbol, order_side, price, quantity);
            let order_id = self.gateway.place_order(&order).await?;
            info!(
                "[LIVE] Order placed - id: {}, side: {}, price: {:.2}, quantity: {:.6}",
                order_id,
                order_side.as_str(),
                price,
                quantity
            );
        } else {
            info!(
                "[PAPER] Simulating order - opening {} position - price: {:.2}, quantity: {:.6}",
                side.as_str().to_uppercase(),
                price,
                quantity
            );
        }

        let position = Position::new(side, quantity, price, now_epoch());
        *guard = Some(position.clone());

        self.record_trade("BUY", quantity, price, signal, "O").await;
        info!("Position opened: {:?}", position);
        Ok(position)
    }

    /// Close the held position at `price`. Fails without side effects when
    /// FLAT; a rejected live close order keeps the position.
    pub async fn close(&self, price: f64) -> Result<ClosedPosition, PositionError> {
        let mut guard = self.position.lock().await;
        let position = match guard.as_ref() {
            Some(p) => p.clone(),
            None => {
                warn!("Cannot close position - no position held");
                return Err(PositionError::NoPosition);
            }
        };

        let pnl = position.pnl(price);
        let pnl_pct = position.pnl_percent(price);

        if self.mode == TradeMode::Live {
            let close_side = match position.side {
                Side::Long => OrderSide::Sell,
                Side::Short => OrderSide::Buy,
            };
            let order = OrderRequest::limit(&self.symbol, close_side, price, position.quantity);
            let order_id = self.gateway.place_order(&order).await?;
            info!("[LIVE] Close order placed - id: {}", order_id);
        } else {
            info!(
                "[PAPER] Simulating close - {} entry: {:.2}, exit: {:.2}, quantity: {:.6}",
                position.side.as_str().to_uppercase(),
                position.entry_price,
                price,
                position.quantity
            );
        }

        // Label heuristic kept from the legacy ledger format: any close that
        // did not breach the stop is recorded as TAKE_PROFIT, including
        // reversal and manual exits.
        let signal = if pnl_pct <= -self.stop_loss_pct {
            "STOP_LOSS"
        } else {
            "TAKE_PROFIT"
        };
        self.record_trade("SELL", position.quantity, price, signal, "C").await;

        info!(
            "Position closed - entry: {:.2}, exit: {:.2}, quantity: {:.6}, PnL: {:.2} ({:.2}%)",
            position.entry_price, price, position.quantity, pnl, pnl_pct
        );
        *guard = None;

        Ok(ClosedPosition {
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: price,
            pnl,
            pnl_pct,
            signal,
        })
    }

    /// Ledger write in the legacy format: BUY rows carry positive quantity
    /// and negative proceeds, SELL rows the reverse. Write failures are
    /// logged, not propagated; the in-memory position stays authoritative.
    async fn record_trade(&self, trade_type: &str, quantity: f64, price: f64, signal: &str, code: &str) {
        let db_quantity = if trade_type == "BUY" { quantity } else { -quantity };
        let row = LegacyTradeRow {
            acct_id: self.acct_id.clone(),
            symbol: self.symbol.clone(),
            trade_datetime: Utc::now().naive_utc(),
            exchange: "woox".to_string(),
            signal: signal.to_string(),
            trade_type: trade_type.to_string(),
            quantity: db_quantity,
            price,
            proceeds: -db_quantity * price,
            commission: 0.0,
            fee: 0.0,
            order_type: "LMT".to_string(),
            code: code.to_string(),
        };
        if let Err(e) = self.store.record_trade(&row).await {
            error!("Error recording transaction: {}", e);
        } else {
            info!(
                "Transaction recorded - type: {}, quantity: {:.6}, price: {:.2}",
                trade_type, db_quantity, price
            );
        }
    }

    /// Overwrite local state, used by reconciliation and startup handling.
    pub async fn set_position(&self, position: Option<Position>) {
        *self.position.lock().await = position;
    }

    /// Re-derive the position from the exchange (live mode only). Spot: a
    /// non-dust base-token balance is an implicit LONG at the reported
    /// average open price. Perp: signed holding gives side and quantity.
    /// Gateway errors keep the cached state.
    pub async fn refresh_from_exchange(&self, current_price: Option<f64>) -> Option<Position> {
        if self.mode != TradeMode::Live {
            return self.current().await;
        }

        let derived = if self.is_spot() {
            let base_token = self.symbol.split('_').nth(1).unwrap_or_default().to_string();
            match self.gateway.get_balances().await {
                Ok(balances) => Some(balances.into_iter().find_map(|b| {
                    if b.token == base_token && b.holding > DUST_THRESHOLD {
                        let entry = b
                            .average_open_price
                            .filter(|p| *p > 0.0)
                            .or(current_price)
                            .unwrap_or(0.0);
                        Some(Position::new(Side::Long, b.holding, entry, now_epoch()))
                    } else {
                        None
                    }
                })),
                Err(e) => {
                    warn!("Balance reconciliation failed, keeping cached position: {}", e);
                    None
                }
            }
        } else {
            match self.gateway.get_positions().await {
                Ok(positions) => Some(positions.into_iter().find_map(|p| {
                    if p.symbol == self.symbol && p.holding != 0.0 {
                        let side = if p.holding > 0.0 { Side::Long } else { Side::Short };
                        Some(Position::new(
                            side,
                            p.holding.abs(),
                            p.average_open_price,
                            p.timestamp.unwrap_or_else(now_epoch),
                        ))
                    } else {
                        None
                    }
                })),
                Err(e) => {
                    warn!("Position reconciliation failed, keeping cached position: {}", e);
                    None
                }
            }
        };

        if let Some(position) = derived {
            self.set_position(position.clone()).await;
            return position;
        }
        self.current().await
    }

    /// Count of open positions across the account, used against the
    /// MAX_OPEN_POSITIONS limit. Falls back to local state on errors and in
    /// paper mode.
    pub async fn open_position_count(&self) -> usize {
        let local = usize::from(self.current().await.is_some());
        if self.mode != TradeMode::Live {
            return local;
        }

        if self.is_spot() {
            match self.gateway.get_balances().await {
                Ok(balances) => balances
                    .iter()
                    .filter(|b| b.token != "USDT" && b.token != "USDC" && b.holding > DUST_THRESHOLD)
                    .count(),
                Err(e) => {
                    warn!("Balance count failed, using local position count: {}", e);
                    local
                }
            }
        } else {
            match self.gateway.get_positions().await {
                Ok(positions) => positions.iter().filter(|p| p.holding != 0.0).count(),
                Err(e) => {
                    warn!("Position count failed, using local position count: {}", e);
                    local
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExchangeError;
    use crate::domain::repositories::exchange_gateway::{
        AccountInfo, ExchangePosition, MarketTrade, OrderbookLevels, TokenBalance,
    };
    use crate::persistence::run_migrations;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    #[derive(Default)]
    struct MockGateway {
        fail_orders: bool,
        balances: Vec<TokenBalance>,
        positions: Vec<ExchangePosition>,
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        async fn get_orderbook(
            &self,
            _symbol: &str,
            _max_level: u32,
        ) -> Result<OrderbookLevels, ExchangeError> {
            Ok(OrderbookLevels::default())
        }

        async fn get_market_trades(
            &self,
            _symbol: &str,
            _limit: u32,
        ) -> Result<Vec<MarketTrade>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn get_balances(&self) -> Result<Vec<TokenBalance>, ExchangeError> {
            Ok(self.balances.clone())
        }

        async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
            Ok(self.positions.clone())
        }

        async fn get_account_info(&self) -> Result<AccountInfo, ExchangeError> {
            Ok(AccountInfo::default())
        }

        async fn place_order(&self, _order: &OrderRequest) -> Result<String, ExchangeError> {
            if self.fail_orders {
                Err(ExchangeError::Server("order rejected".into()))
            } else {
                Ok("42".into())
            }
        }

        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    async fn memory_store() -> TransactionStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        TransactionStore::new(pool)
    }

    async fn paper_manager(symbol: &str) -> PositionManager {
        PositionManager::new(
            symbol.to_string(),
            TradeMode::Paper,
            "TRADER".to_string(),
            2.0,
            Arc::new(MockGateway::default()),
            memory_store().await,
        )
    }

    async fn ledger_rows(manager: &PositionManager) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades")
            .fetch_one(manager.store.pool())
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn test_double_open_fails_without_mutation() {
        let manager = paper_manager("SPOT_BTC_USDT").await;
        manager.open(Side::Long, 100.0, 1.0, "MA_CROSS").await.unwrap();
        let held = manager.current().await.unwrap();

        let err = manager.open(Side::Long, 105.0, 1.0, "MA_CROSS").await.unwrap_err();
        assert!(matches!(err, PositionError::AlreadyOpen));
        assert_eq!(manager.current().await.unwrap(), held);
        assert_eq!(ledger_rows(&manager).await, 1);
    }

    #[tokio::test]
    async fn test_close_flat_has_no_side_effects() {
        let manager = paper_manager("SPOT_BTC_USDT").await;
        let err = manager.close(100.0).await.unwrap_err();
        assert!(matches!(err, PositionError::NoPosition));
        assert_eq!(ledger_rows(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_spot_short_rejected() {
        let manager = paper_manager("SPOT_BTC_USDT").await;
        let err = manager.open(Side::Short, 100.0, 1.0, "RSI").await.unwrap_err();
        assert!(matches!(err, PositionError::ShortNotSupported));
        assert!(manager.current().await.is_none());
        assert_eq!(ledger_rows(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_perp_short_allowed() {
        let manager = paper_manager("PERP_BTC_USDT").await;
        let position = manager.open(Side::Short, 100.0, 1.0, "RSI").await.unwrap();
        assert_eq!(position.side, Side::Short);
    }

    #[tokio::test]
    async fn test_take_profit_close_labels_and_ledger() {
        let manager = paper_manager("SPOT_BTC_USDT").await;
        manager.open(Side::Long, 50000.0, 0.002, "MA_CROSS").await.unwrap();
        let closed = manager.close(51500.0).await.unwrap();

        assert_eq!(closed.signal, "TAKE_PROFIT");
        assert!((closed.pnl_pct - 3.0).abs() < 1e-9);
        assert!((closed.pnl - 3.0).abs() < 1e-9);
        assert!(manager.current().await.is_none());

        let summary = manager.store.summary(None).await.unwrap();
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.winning_trades, 1);
        assert!((summary.cash_pnl - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stop_loss_label_on_losing_close() {
        let manager = paper_manager("SPOT_BTC_USDT").await;
        manager.open(Side::Long, 100.0, 1.0, "MA_CROSS").await.unwrap();
        let closed = manager.close(97.0).await.unwrap();
        assert_eq!(closed.signal, "STOP_LOSS");

        let summary = manager.store.summary(None).await.unwrap();
        assert_eq!(summary.losing_trades, 1);
    }

    #[tokio::test]
    async fn test_live_open_failure_leaves_flat() {
        let manager = PositionManager::new(
            "PERP_BTC_USDT".to_string(),
            TradeMode::Live,
            "TRADER".to_string(),
            2.0,
            Arc::new(MockGateway {
                fail_orders: true,
                ..Default::default()
            }),
            memory_store().await,
        );
        let err = manager.open(Side::Long, 100.0, 1.0, "MA_CROSS").await.unwrap_err();
        assert!(matches!(err, PositionError::Exchange(_)));
        assert!(manager.current().await.is_none());
        assert_eq!(ledger_rows(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_live_close_failure_keeps_position() {
        let manager = PositionManager::new(
            "PERP_BTC_USDT".to_string(),
            TradeMode::Live,
            "TRADER".to_string(),
            2.0,
            Arc::new(MockGateway {
                fail_orders: true,
                ..Default::default()
            }),
            memory_store().await,
        );
        manager
            .set_position(Some(Position::new(Side::Long, 1.0, 100.0, 0.0)))
            .await;
        let err = manager.close(110.0).await.unwrap_err();
        assert!(matches!(err, PositionError::Exchange(_)));
        assert!(manager.current().await.is_some());
    }

    #[tokio::test]
    async fn test_spot_reconciliation_from_balance() {
        let manager = PositionManager::new(
            "SPOT_BTC_USDT".to_string(),
            TradeMode::Live,
            "TRADER".to_string(),
            2.0,
            Arc::new(MockGateway {
                balances: vec![
                    TokenBalance {
                        token: "USDT".into(),
                        holding: 1000.0,
                        average_open_price: None,
                    },
                    TokenBalance {
                        token: "BTC".into(),
                        holding: 0.5,
                        average_open_price: Some(48000.0),
                    },
                ],
                ..Default::default()
            }),
            memory_store().await,
        );

        let position = manager.refresh_from_exchange(Some(50000.0)).await.unwrap();
        assert_eq!(position.side, Side::Long);
        assert_eq!(position.quantity, 0.5);
        assert_eq!(position.entry_price, 48000.0);
        assert_eq!(manager.open_position_count().await, 1);
    }

    #[tokio::test]
    async fn test_spot_dust_balance_clears_position() {
        let manager = PositionManager::new(
            "SPOT_BTC_USDT".to_string(),
            TradeMode::Live,
            "TRADER".to_string(),
            2.0,
            Arc::new(MockGateway {
                balances: vec![TokenBalance {
                    token: "BTC".into(),
                    holding: 0.00001,
                    average_open_price: Some(48000.0),
                }],
                ..Default::default()
            }),
            memory_store().await,
        );
        manager
            .set_position(Some(Position::new(Side::Long, 1.0, 100.0, 0.0)))
            .await;

        assert!(manager.refresh_from_exchange(None).await.is_none());
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn test_perp_reconciliation_signed_holding() {
        let manager = PositionManager::new(
            "PERP_BTC_USDT".to_string(),
            TradeMode::Live,
            "TRADER".to_string(),
            2.0,
            Arc::new(MockGateway {
                positions: vec![ExchangePosition {
                    symbol: "PERP_BTC_USDT".into(),
                    holding: -2.0,
                    average_open_price: 100.0,
                    timestamp: Some(1.0),
                }],
                ..Default::default()
            }),
            memory_store().await,
        );

        let position = manager.refresh_from_exchange(None).await.unwrap();
        assert_eq!(position.side, Side::Short);
        assert_eq!(position.quantity, 2.0);
        assert_eq!(position.entry_price, 100.0);
    }
}
