//! FIFO replay of executed fills into realized/unrealized PnL and risk
//! metrics.
//!
//! Both ledger schemas normalize into a chronological fill stream before
//! replay, so the accounting here never needs to know which schema the rows
//! came from. A sell larger than the held long flips the residual quantity
//! into a short at the fill price (and vice versa).

use crate::domain::entities::order::OrderSide;

/// One executed fill, already sorted chronologically by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Fill {
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
}

impl Fill {
    pub fn new(side: OrderSide, quantity: f64, price: f64) -> Self {
        Fill {
            side,
            quantity,
            price,
        }
    }
}

/// Result of replaying a fill stream from a flat start.
#[derive(Debug, Clone, Default)]
pub struct FifoReplay {
    pub realized_pnl: f64,
    /// PnL per closing event, in order.
    pub trade_pnls: Vec<f64>,
    /// Cumulative realized PnL after each closing event, starting from 0.
    pub equity_curve: Vec<f64>,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Residual quantity, signed: positive long, negative short.
    pub net_quantity: f64,
    /// Weighted average entry price of the residual position.
    pub avg_entry_price: f64,
}

impl FifoReplay {
    pub fn replay(fills: &[Fill]) -> Self {
        let mut replay = FifoReplay {
            equity_curve: vec![0.0],
            ..Default::default()
        };
        // Signed synthetic position: >0 long, <0 short.
        let mut position = 0.0f64;
        let mut avg_price = 0.0f64;

        for fill in fills {
            let signed = match fill.side {
                OrderSide::Buy => fill.quantity,
                OrderSide::Sell => -fill.quantity,
            };
            if signed == 0.0 {
                continue;
            }

            if position == 0.0 {
                position = signed;
                avg_price = fill.price;
            } else if position.signum() == signed.signum() {
                // Scale in: weighted average entry.
                let total = position.abs() + fill.quantity;
                avg_price = (position.abs() * avg_price + fill.quantity * fill.price) / total;
                position += signed;
            } else {
                let closed = fill.quantity.min(position.abs());
                let pnl = if position > 0.0 {
                    (fill.price - avg_price) * closed
                } else {
                    (avg_price - fill.price) * closed
                };
                replay.realized_pnl += pnl;
                replay.trade_pnls.push(pnl);
                replay.equity_curve.push(replay.realized_pnl);
                if pnl > 0.0 {
                    replay.winning_trades += 1;
                } else if pnl < 0.0 {
                    replay.losing_trades += 1;
                }

                let remainder = fill.quantity - closed;
                if remainder > 0.0 {
                    // Oversized fill flips the position.
                    position = remainder * signed.signum();
                    avg_price = fill.price;
                } else {
                    position += signed;
                    if position == 0.0 {
                        avg_price = 0.0;
                    }
                }
            }
        }

        replay.net_quantity = position;
        replay.avg_entry_price = avg_price;
        replay
    }

    /// Per-trade Sharpe ratio: mean / population stddev of `trade_pnls`.
    /// Zero when there are fewer than two closes or the pnls are constant.
    pub fn sharpe_ratio(&self) -> f64 {
        let n = self.trade_pnls.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.trade_pnls.iter().sum::<f64>() / n as f64;
        let variance = self
            .trade_pnls
            .iter()
            .map(|p| (p - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let stdev = variance.sqrt();
        if stdev > 0.0 {
            mean / stdev
        } else {
            0.0
        }
    }

    /// Largest peak-to-trough decline of the cumulative equity curve.
    pub fn max_drawdown(&self) -> f64 {
        let mut peak = 0.0f64;
        let mut drawdown = 0.0f64;
        for &equity in &self.equity_curve {
            if equity > peak {
                peak = equity;
            }
            drawdown = drawdown.max(peak - equity);
        }
        drawdown
    }

    /// Highest point of the cumulative equity curve (never below zero).
    pub fn peak_pnl(&self) -> f64 {
        self.equity_curve.iter().fold(0.0f64, |acc, &e| acc.max(e))
    }

    /// Mark-to-market PnL of the residual position.
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        if self.net_quantity > 0.0 {
            (current_price - self.avg_entry_price) * self.net_quantity
        } else if self.net_quantity < 0.0 {
            (self.avg_entry_price - current_price) * self.net_quantity.abs()
        } else {
            0.0
        }
    }
}
