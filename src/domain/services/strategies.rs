//! Entry/exit signal strategies.
//!
//! All strategies share the same exit contract: stop-loss / take-profit by
//! percentage of entry price, plus a reversal exit when the opposite entry
//! signal fires while a position is held. Entry semantics differ:
//! MA crossover and RSI are edge-triggered on resampled bars, Bollinger is
//! level-triggered on raw prices and re-fires while the condition holds.

use tracing::{debug, info};

use crate::config::Config;
use crate::domain::entities::position::{Position, Side};
use crate::domain::errors::UnknownStrategy;
use crate::domain::market_state::MarketState;

pub const STRATEGY_NAMES: [&str; 3] = ["ma_crossover", "rsi", "bollinger_bands"];

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entry signal from the market window, if any.
    fn entry_signal(&self, market: &MarketState) -> Option<Side>;

    /// Whether the held position should be closed at `current_price`.
    fn exit_signal(&self, position: &Position, current_price: f64, market: &MarketState) -> bool {
        if self.exits().triggered(position, current_price) {
            return true;
        }
        // Reversal: the opposite entry signal while in a position.
        matches!(self.entry_signal(market), Some(signal) if signal == position.side.opposite())
    }

    fn exits(&self) -> ExitRules;
}

/// Stop-loss / take-profit thresholds shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct ExitRules {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl ExitRules {
    pub fn from_config(config: &Config) -> Self {
        ExitRules {
            stop_loss_pct: config.get_f64("STOP_LOSS_PCT", 2.0),
            take_profit_pct: config.get_f64("TAKE_PROFIT_PCT", 3.0),
        }
    }

    pub fn triggered(&self, position: &Position, current_price: f64) -> bool {
        if current_price <= 0.0 {
            return false;
        }
        let pnl_pct = position.pnl_percent(current_price);
        if pnl_pct <= -self.stop_loss_pct {
            info!("Exit signal - stop loss triggered (PnL: {:.2}%)", pnl_pct);
            true
        } else if pnl_pct >= self.take_profit_pct {
            info!("Exit signal - take profit triggered (PnL: {:.2}%)", pnl_pct);
            true
        } else {
            false
        }
    }
}

fn sma(prices: &[f64]) -> f64 {
    prices.iter().sum::<f64>() / prices.len() as f64
}

/// Simple moving-average crossover, edge-triggered against a threshold band
/// around the long MA.
pub struct MovingAverageCrossover {
    short_period: usize,
    long_period: usize,
    timeframe_secs: u64,
    threshold_pct: f64,
    exits: ExitRules,
}

impl MovingAverageCrossover {
    pub fn from_config(config: &Config) -> Self {
        MovingAverageCrossover {
            short_period: config.get_usize("SHORT_MA_PERIOD", 20),
            long_period: config.get_usize("LONG_MA_PERIOD", 50),
            timeframe_secs: config.get_u64("MA_TIMEFRAME", 60),
            threshold_pct: config.get_f64("MA_THRESHOLD", 5.0),
            exits: ExitRules::from_config(config),
        }
    }
}

impl Strategy for MovingAverageCrossover {
    fn name(&self) -> &'static str {
        "ma_crossover"
    }

    fn entry_signal(&self, market: &MarketState) -> Option<Side> {
        let prices = market.resampled_prices(self.timeframe_secs);
        // One extra bar is needed for the previous-window MAs. The longer
        // of the two periods bounds the window even when the config puts
        // the short period above the long one.
        let needed = self.long_period.max(self.short_period) + 1;
        if prices.len() < needed {
            debug!(
                "Not enough resampled data: {}/{} required",
                prices.len(),
                needed
            );
            return None;
        }

        let n = prices.len();
        let short_ma = sma(&prices[n - self.short_period..]);
        let long_ma = sma(&prices[n - self.long_period..]);
        let prev_short_ma = sma(&prices[n - self.short_period - 1..n - 1]);
        let prev_long_ma = sma(&prices[n - self.long_period - 1..n - 1]);

        let threshold = self.threshold_pct / 100.0;
        let long_now = short_ma > long_ma * (1.0 + threshold);
        let long_prev = prev_short_ma > prev_long_ma * (1.0 + threshold);
        let short_now = short_ma < long_ma * (1.0 - threshold);
        let short_prev = prev_short_ma < prev_long_ma * (1.0 - threshold);

        if long_now && !long_prev {
            info!(
                "LONG signal - short MA {:.2} crossed above long MA {:.2} (threshold {:.1}%)",
                short_ma, long_ma, self.threshold_pct
            );
            Some(Side::Long)
        } else if short_now && !short_prev {
            info!(
                "SHORT signal - short MA {:.2} crossed below long MA {:.2} (threshold {:.1}%)",
                short_ma, long_ma, self.threshold_pct
            );
            Some(Side::Short)
        } else {
            None
        }
    }

    fn exits(&self) -> ExitRules {
        self.exits
    }
}

/// RSI via simple (non-Wilder) gain/loss averages, edge-triggered on the
/// oversold/overbought thresholds.
pub struct RsiStrategy {
    period: usize,
    timeframe_secs: u64,
    oversold: f64,
    overbought: f64,
    exits: ExitRules,
}

impl RsiStrategy {
    pub fn from_config(config: &Config) -> Self {
        RsiStrategy {
            period: config.get_usize("RSI_PERIOD", 14),
            timeframe_secs: config.get_u64("RSI_TIMEFRAME", 60),
            oversold: config.get_f64("RSI_OVERSOLD", 30.0),
            overbought: config.get_f64("RSI_OVERBOUGHT", 70.0),
            exits: ExitRules::from_config(config),
        }
    }
}

/// RSI over the trailing `period` deltas. `avg_loss == 0` maps to 100.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }
    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &deltas[deltas.len() - period..];
    let avg_gain: f64 = recent.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let avg_loss: f64 = -recent.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn entry_signal(&self, market: &MarketState) -> Option<Side> {
        let prices = market.resampled_prices(self.timeframe_secs);
        // One bar for the previous RSI on top of period+1 for the current.
        if prices.len() < self.period + 2 {
            return None;
        }

        let current = rsi(&prices, self.period)?;
        let previous = rsi(&prices[..prices.len() - 1], self.period)?;

        if previous <= self.oversold && current > self.oversold {
            info!("LONG signal - RSI crossed above oversold: {:.2}", current);
            Some(Side::Long)
        } else if previous >= self.overbought && current < self.overbought {
            info!("SHORT signal - RSI crossed below overbought: {:.2}", current);
            Some(Side::Short)
        } else {
            None
        }
    }

    fn exits(&self) -> ExitRules {
        self.exits
    }
}

/// Bollinger bands over raw prices. Level-triggered: the signal repeats
/// every tick the price stays at or beyond a band.
pub struct BollingerBandsStrategy {
    period: usize,
    std_dev: f64,
    exits: ExitRules,
}

impl BollingerBandsStrategy {
    pub fn from_config(config: &Config) -> Self {
        BollingerBandsStrategy {
            period: config.get_usize("BB_PERIOD", 20),
            std_dev: config.get_f64("BB_STD_DEV", 2.0),
            exits: ExitRules::from_config(config),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// SMA plus/minus `std_dev` population standard deviations over the trailing
/// `period` prices.
pub fn bollinger_bands(prices: &[f64], period: usize, std_dev: f64) -> Option<BollingerBands> {
    if prices.len() < period {
        return None;
    }
    let recent = &prices[prices.len() - period..];
    let middle = sma(recent);
    let variance = recent.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    Some(BollingerBands {
        upper: middle + std_dev * std,
        middle,
        lower: middle - std_dev * std,
    })
}

impl Strategy for BollingerBandsStrategy {
    fn name(&self) -> &'static str {
        "bollinger_bands"
    }

    fn entry_signal(&self, market: &MarketState) -> Option<Side> {
        let prices = market.raw_prices();
        let bands = bollinger_bands(&prices, self.period, self.std_dev)?;
        let current = *prices.last()?;

        if current <= bands.lower {
            info!(
                "LONG signal - price {:.2} at/below lower band {:.2}",
                current, bands.lower
            );
            Some(Side::Long)
        } else if current >= bands.upper {
            info!(
                "SHORT signal - price {:.2} at/above upper band {:.2}",
                current, bands.upper
            );
            Some(Side::Short)
        } else {
            None
        }
    }

    fn exits(&self) -> ExitRules {
        self.exits
    }
}

/// Resolve a strategy by registry name.
pub fn get_strategy(name: &str, config: &Config) -> Result<Box<dyn Strategy>, UnknownStrategy> {
    match name.to_lowercase().as_str() {
        "ma_crossover" => Ok(Box::new(MovingAverageCrossover::from_config(config))),
        "rsi" => Ok(Box::new(RsiStrategy::from_config(config))),
        "bollinger_bands" => Ok(Box::new(BollingerBandsStrategy::from_config(config))),
        other => Err(UnknownStrategy {
            name: other.to_string(),
            available: STRATEGY_NAMES.join(", "),
        }),
    }
}
