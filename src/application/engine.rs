//! Trading loop orchestration.
//!
//! Two-tier cadence on one task: a fast tick (1s) refreshes market data, a
//! 3s tick reconciles the position against the exchange, and the decision
//! tick (UPDATE_INTERVAL_SECONDS, default 60s) evaluates the strategies and
//! trades. Keeping decisions on a single task, with the position mutex
//! underneath, means auto and manual trades can never race a double-open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{Config, TradeMode};
use crate::domain::entities::position::{Position, Side};
use crate::domain::errors::{EngineError, PositionError};
use crate::domain::market_state::{
    MarketState, OrderbookSnapshot, SupportResistance, DEFAULT_DEPTH_LEVELS,
};
use crate::domain::repositories::exchange_gateway::ExchangeGateway;
use crate::domain::services::position_manager::{ClosedPosition, PositionManager};
use crate::domain::services::strategies::{get_strategy, Strategy};
use crate::persistence::store::{PerformanceSummary, TransactionStore};

const MARKET_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const POSITION_CHECK_INTERVAL: Duration = Duration::from_secs(3);

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Order quantity from the configured sizing scheme: a fixed quote value,
/// a fixed asset quantity, or a percentage of account equity. A missing
/// equity figure falls back to a small fixed value.
pub fn order_quantity(size_type: &str, size_value: f64, price: f64, equity: Option<f64>) -> f64 {
    match size_type {
        "percentage" => {
            let amount = match equity {
                Some(total) => {
                    let amount = total * (size_value / 100.0);
                    info!(
                        "Calculated position size: ${:.2} ({}% of ${:.2})",
                        amount, size_value, total
                    );
                    amount
                }
                None => {
                    warn!("Equity unavailable for percentage sizing, using $100 fallback");
                    100.0
                }
            };
            amount / price
        }
        "quantity" => {
            info!("Using fixed quantity: {}", size_value);
            size_value
        }
        _ => size_value / price,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub mode: String,
    pub symbol: String,
    pub entry_strategy: &'static str,
    pub exit_strategy: &'static str,
    pub current_price: Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderbookView {
    pub orderbook: OrderbookSnapshot,
    pub support_resistance: SupportResistance,
}

/// Position plus its mark-to-market PnL at the latest price.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub current_price: Option<f64>,
    pub pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketView {
    pub price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<f64>,
    pub imbalance: Option<f64>,
    pub support_resistance: SupportResistance,
    pub samples: usize,
}

pub struct TradingEngine {
    config: Config,
    symbol: String,
    mode: TradeMode,
    gateway: Arc<dyn ExchangeGateway>,
    store: TransactionStore,
    market: RwLock<MarketState>,
    positions: PositionManager,
    entry_strategy: Box<dyn Strategy>,
    exit_strategy: Box<dyn Strategy>,
    running: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TradingEngine {
    pub fn new(
        config: Config,
        gateway: Arc<dyn ExchangeGateway>,
        store: TransactionStore,
    ) -> Result<Self, EngineError> {
        let symbol = config.symbol();
        let mode = config.trade_mode();
        let entry_strategy = get_strategy(&config.get_str("ENTRY_STRATEGY", "ma_crossover"), &config)?;
        let exit_strategy = get_strategy(&config.get_str("EXIT_STRATEGY", "ma_crossover"), &config)?;
        info!(
            "Strategies loaded - entry: {}, exit: {}",
            entry_strategy.name(),
            exit_strategy.name()
        );

        let positions = PositionManager::new(
            symbol.clone(),
            mode,
            config.get_str("USER", "TRADER"),
            config.get_f64("STOP_LOSS_PCT", 2.0),
            Arc::clone(&gateway),
            store.clone(),
        );

        Ok(TradingEngine {
            config,
            symbol,
            mode,
            gateway,
            store,
            market: RwLock::new(MarketState::new()),
            positions,
            entry_strategy,
            exit_strategy,
            running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the trading loop. Fails if already running. A restart joins
    /// the stopped loop first, so raising the flag again can never revive
    /// it alongside the new one.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut slot = self.loop_handle.lock().await;
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        if let Some(previous) = slot.take() {
            if let Err(e) = previous.await {
                error!("Trading loop task failed: {}", e);
            }
        }
        info!("Starting trading bot...");
        self.running.store(true, Ordering::SeqCst);
        let engine = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { engine.run().await }));
        Ok(())
    }

    /// Raise the cooperative stop flag; the loop observes it within one
    /// tick and closes any open position best-effort.
    pub fn stop(&self) -> Result<(), EngineError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }
        info!("Stop signal received");
        Ok(())
    }

    /// Stop and wait for the loop task to finish.
    pub async fn shutdown(&self) {
        let _ = self.stop();
        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Trading loop task failed: {}", e);
            }
        }
    }

    async fn run(self: Arc<Self>) {
        self.startup().await;

        let decision_interval =
            Duration::from_secs(self.config.get_u64("UPDATE_INTERVAL_SECONDS", 60).max(1));
        let mut market_tick = interval(MARKET_REFRESH_INTERVAL);
        let mut position_tick = interval(POSITION_CHECK_INTERVAL);
        let mut decision_tick = interval(decision_interval);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = market_tick.tick() => self.refresh_market().await,
                _ = position_tick.tick() => {
                    let price = self.current_price().await;
                    self.positions.refresh_from_exchange(price).await;
                }
                _ = decision_tick.tick() => self.decision_cycle().await,
            }
        }

        // Best-effort close before exit.
        if self.positions.current().await.is_some() {
            match self.current_price().await {
                Some(price) => {
                    info!("Closing position before shutdown...");
                    if let Err(e) = self.positions.close(price).await {
                        error!("Shutdown close failed: {}", e);
                    }
                }
                None => warn!("Cannot close position on shutdown: price data unavailable"),
            }
        }
        info!("Trading bot shutdown complete");
    }

    /// Initial market fetch, reconciliation, and the configured action for a
    /// pre-existing position (KEEP monitors it, CLOSE exits immediately).
    async fn startup(&self) {
        info!("Performing initial position check...");
        self.refresh_market().await;
        let price = self.current_price().await;
        let existing = self.positions.refresh_from_exchange(price).await;

        if let Some(position) = existing {
            let action = self
                .config
                .get_str("ON_STARTUP_POSITION_ACTION", "KEEP")
                .to_uppercase();
            info!(
                "Existing position found: {} {:.6}. Startup action: {}",
                position.side.as_str(),
                position.quantity,
                action
            );
            if action == "CLOSE" {
                match price {
                    Some(p) => {
                        if let Err(e) = self.positions.close(p).await {
                            error!("Startup close failed: {}", e);
                        }
                    }
                    None => warn!("Cannot close position: price data unavailable"),
                }
            }
        }
    }

    /// Pull orderbook and latest trade, then append one sample. Gateway
    /// errors leave the previous market state in place.
    async fn refresh_market(&self) {
        let book = match self
            .gateway
            .get_orderbook(&self.symbol, DEFAULT_DEPTH_LEVELS as u32)
            .await
        {
            Ok(book) => book,
            Err(e) => {
                warn!("Orderbook fetch failed: {}", e);
                return;
            }
        };

        let mut bids = book.bids;
        let mut asks = book.asks;
        bids.truncate(DEFAULT_DEPTH_LEVELS);
        asks.truncate(DEFAULT_DEPTH_LEVELS);
        let snapshot = OrderbookSnapshot::new(bids, asks, book.timestamp.or(Some(now_epoch())));

        let (price, volume) = match self.gateway.get_market_trades(&self.symbol, 1).await {
            Ok(trades) => match trades.first() {
                Some(trade) => (Some(trade.price), Some(trade.quantity)),
                None => (None, None),
            },
            Err(e) => {
                warn!("Market trades fetch failed: {}", e);
                (None, None)
            }
        };
        // Fall back to mid-price when there is no recent trade.
        let price = price.or(snapshot.mid_price);
        let Some(price) = price else { return };

        let bid = snapshot.best_bid();
        let ask = snapshot.best_ask();
        let mut market = self.market.write().await;
        market.ingest(price, volume.unwrap_or(0.0), bid, ask, snapshot, now_epoch());
    }

    async fn decision_cycle(&self) {
        let position = self.positions.current().await;

        // Evaluate strategies under the read lock, act after dropping it.
        let (price, bid, ask, should_close, entry_signal) = {
            let market = self.market.read().await;
            let price = market.current_price;
            let should_close = match (&position, price) {
                (Some(pos), Some(p)) => self.exit_strategy.exit_signal(pos, p, &market),
                _ => false,
            };
            let entry_signal = if position.is_none() {
                self.entry_strategy.entry_signal(&market)
            } else {
                None
            };
            (price, market.current_bid, market.current_ask, should_close, entry_signal)
        };

        if position.is_some() {
            if should_close {
                if let Some(p) = price {
                    if let Err(e) = self.positions.close(p).await {
                        error!("Error closing position: {}", e);
                    }
                }
            }
            // Mirror of the open guard below: a position held at cycle
            // start defers any new entry to the next cycle.
            return;
        }

        let Some(signal) = entry_signal else { return };
        let Some(price) = price else { return };

        let max_positions = self.config.get_usize("MAX_OPEN_POSITIONS", 1);
        if self.positions.open_position_count().await >= max_positions {
            return;
        }

        let quantity = self.sized_quantity(price).await;
        let limit_price = match signal {
            Side::Long => ask,
            Side::Short => bid,
        };
        let Some(limit_price) = limit_price else { return };

        let label = self.entry_strategy.name().to_uppercase();
        if let Err(e) = self.positions.open(signal, limit_price, quantity, &label).await {
            error!("Error opening position: {}", e);
        }
    }

    async fn sized_quantity(&self, price: f64) -> f64 {
        let size_type = self.config.get_str("MAX_POS_SIZE_TYPE", "value");
        let size_value = self.config.get_f64("MAX_POS_SIZE_VALUE", 10.0);
        let equity = if size_type == "percentage" {
            self.account_equity().await
        } else {
            None
        };
        order_quantity(&size_type, size_value, price, equity)
    }

    /// Live equity is the exchange-reported collateral; paper equity is a
    /// fixed 100k bankroll plus ledger PnL.
    async fn account_equity(&self) -> Option<f64> {
        match self.mode {
            TradeMode::Live => match self.gateway.get_account_info().await {
                Ok(info) => Some(info.total_collateral),
                Err(e) => {
                    error!("Error fetching account info for sizing: {}", e);
                    None
                }
            },
            TradeMode::Paper => match self.store.summary(None).await {
                Ok(summary) => Some(100_000.0 + summary.net_pnl),
                Err(e) => {
                    error!("Error reading ledger for sizing: {}", e);
                    None
                }
            },
        }
    }

    pub async fn current_price(&self) -> Option<f64> {
        self.market.read().await.current_price
    }

    pub async fn status(&self) -> EngineStatus {
        let market = self.market.read().await;
        EngineStatus {
            running: self.is_running(),
            mode: self.mode.to_string(),
            symbol: self.symbol.clone(),
            entry_strategy: self.entry_strategy.name(),
            exit_strategy: self.exit_strategy.name(),
            current_price: market.current_price,
            samples: market.len(),
        }
    }

    pub async fn market_view(&self) -> MarketView {
        let market = self.market.read().await;
        MarketView {
            price: market.current_price,
            bid: market.current_bid,
            ask: market.current_ask,
            volume: market.current_volume,
            imbalance: market.imbalance(),
            support_resistance: market.support_resistance(10),
            samples: market.len(),
        }
    }

    pub async fn orderbook(&self) -> OrderbookView {
        let market = self.market.read().await;
        OrderbookView {
            orderbook: market.orderbook.clone(),
            support_resistance: market.support_resistance(10),
        }
    }

    pub async fn position(&self) -> Option<PositionView> {
        let position = self.positions.current().await?;
        let price = self.current_price().await;
        Some(PositionView {
            pnl: price.map(|p| position.pnl(p)),
            pnl_pct: price.map(|p| position.pnl_percent(p)),
            current_price: price,
            position,
        })
    }

    pub async fn summary(&self) -> Result<PerformanceSummary, EngineError> {
        let price = self.current_price().await;
        self.store
            .summary(price)
            .await
            .map_err(|e| EngineError::Position(PositionError::Store(e)))
    }

    /// Manual open from the dashboard: sized like auto trades, entered at
    /// the touch (ask for long, bid for short).
    pub async fn manual_open(&self, side: Side) -> Result<Position, EngineError> {
        let (price, bid, ask) = {
            let market = self.market.read().await;
            (market.current_price, market.current_bid, market.current_ask)
        };
        let reference = price.ok_or(EngineError::NoMarketData)?;
        let limit_price = match side {
            Side::Long => ask,
            Side::Short => bid,
        }
        .unwrap_or(reference);

        let quantity = self.sized_quantity(reference).await;
        let position = self.positions.open(side, limit_price, quantity, "MANUAL").await?;
        Ok(position)
    }

    pub async fn manual_close(&self) -> Result<ClosedPosition, EngineError> {
        let price = self.current_price().await.ok_or(EngineError::NoMarketData)?;
        Ok(self.positions.close(price).await?)
    }
}
