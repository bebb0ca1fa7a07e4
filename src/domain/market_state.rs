//! In-memory market picture for the traded symbol.
//!
//! A bounded ring buffer of price samples (one per refresh tick, capacity
//! covers roughly a day at one sample per second being resampled to minutes)
//! plus the latest orderbook snapshot. Strategies read from here only; the
//! engine is the single writer.

use std::collections::VecDeque;

use serde::Serialize;

/// Maximum samples retained; the oldest is evicted first.
pub const PRICE_WINDOW_CAPACITY: usize = 1440;

/// Orderbook levels inspected for depth and support/resistance.
pub const DEFAULT_DEPTH_LEVELS: usize = 30;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OrderbookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Aggregated view of one orderbook fetch. Depth metrics are computed once
/// at construction so readers never recompute them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderbookSnapshot {
    /// Best bid first.
    pub bids: Vec<OrderbookLevel>,
    /// Best ask first.
    pub asks: Vec<OrderbookLevel>,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub spread: f64,
    pub mid_price: Option<f64>,
    pub timestamp: Option<f64>,
}

impl OrderbookSnapshot {
    pub fn new(
        bids: Vec<OrderbookLevel>,
        asks: Vec<OrderbookLevel>,
        timestamp: Option<f64>,
    ) -> Self {
        let bid_depth: f64 = bids.iter().take(DEFAULT_DEPTH_LEVELS).map(|l| l.quantity).sum();
        let ask_depth: f64 = asks.iter().take(DEFAULT_DEPTH_LEVELS).map(|l| l.quantity).sum();
        let (spread, mid_price) = match (bids.first(), asks.first()) {
            (Some(bid), Some(ask)) => (ask.price - bid.price, Some((ask.price + bid.price) / 2.0)),
            _ => (0.0, None),
        };
        OrderbookSnapshot {
            bids,
            asks,
            bid_depth,
            ask_depth,
            spread,
            mid_price,
            timestamp,
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Depth imbalance in [-1, 1]: positive means more bid-side quantity.
    /// None until both sides have depth.
    pub fn imbalance(&self) -> Option<f64> {
        if self.bid_depth <= 0.0 || self.ask_depth <= 0.0 {
            return None;
        }
        Some((self.bid_depth - self.ask_depth) / (self.bid_depth + self.ask_depth))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceSample {
    pub price: f64,
    pub volume: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    /// Book state at sample time, for strategies that read depth.
    pub orderbook: OrderbookSnapshot,
    /// Epoch seconds when the sample was taken.
    pub timestamp: f64,
}

/// A price level ranked by resting quantity.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PriceLevelStrength {
    pub price: f64,
    pub strength: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SupportResistance {
    pub support: Vec<PriceLevelStrength>,
    pub resistance: Vec<PriceLevelStrength>,
}

#[derive(Debug, Clone, Default)]
pub struct MarketState {
    samples: VecDeque<PriceSample>,
    pub orderbook: OrderbookSnapshot,
    pub current_price: Option<f64>,
    pub current_volume: Option<f64>,
    pub current_bid: Option<f64>,
    pub current_ask: Option<f64>,
}

impl MarketState {
    pub fn new() -> Self {
        MarketState {
            samples: VecDeque::with_capacity(PRICE_WINDOW_CAPACITY),
            ..Default::default()
        }
    }

    /// Record one refresh tick. Evicts the oldest sample once the window is
    /// full.
    pub fn ingest(
        &mut self,
        price: f64,
        volume: f64,
        bid: Option<f64>,
        ask: Option<f64>,
        orderbook: OrderbookSnapshot,
        timestamp: f64,
    ) {
        if self.samples.len() == PRICE_WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.current_price = Some(price);
        self.current_volume = Some(volume);
        self.current_bid = bid.or(orderbook.best_bid());
        self.current_ask = ask.or(orderbook.best_ask());
        self.orderbook = orderbook.clone();
        self.samples.push_back(PriceSample {
            price,
            volume,
            bid,
            ask,
            orderbook,
            timestamp,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&PriceSample> {
        self.samples.back()
    }

    /// Raw prices oldest first.
    pub fn raw_prices(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.price).collect()
    }

    /// Last-value resample into `timeframe_secs` buckets keyed by
    /// `floor(timestamp / timeframe)`. Each completed bucket contributes its
    /// last observed price at the bucket's start time; the trailing partial
    /// bucket is included so the series always ends at the newest price.
    /// Timeframes of a second or less return the raw series.
    pub fn resample(&self, timeframe_secs: u64) -> Vec<(i64, f64)> {
        if timeframe_secs <= 1 {
            return self
                .samples
                .iter()
                .map(|s| (s.timestamp as i64, s.price))
                .collect();
        }
        let timeframe = timeframe_secs as f64;
        let mut out = Vec::new();
        let mut current_bucket: Option<i64> = None;
        let mut last_price = 0.0;
        for sample in &self.samples {
            let bucket = (sample.timestamp / timeframe).floor() as i64;
            match current_bucket {
                Some(b) if b == bucket => {}
                Some(b) => out.push((b * timeframe_secs as i64, last_price)),
                None => {}
            }
            current_bucket = Some(bucket);
            last_price = sample.price;
        }
        if let Some(b) = current_bucket {
            out.push((b * timeframe_secs as i64, last_price));
        }
        out
    }

    /// Prices of the resampled series, oldest first.
    pub fn resampled_prices(&self, timeframe_secs: u64) -> Vec<f64> {
        self.resample(timeframe_secs).into_iter().map(|(_, p)| p).collect()
    }

    /// Orderbook depth imbalance, see [`OrderbookSnapshot::imbalance`].
    pub fn imbalance(&self) -> Option<f64> {
        self.orderbook.imbalance()
    }

    /// Strongest resting levels: top three bids by quantity as support and
    /// top three asks by quantity as resistance, each drawn from the first
    /// `levels` price levels.
    pub fn support_resistance(&self, levels: usize) -> SupportResistance {
        SupportResistance {
            support: strongest_levels(&self.orderbook.bids, levels),
            resistance: strongest_levels(&self.orderbook.asks, levels),
        }
    }
}

fn strongest_levels(side: &[OrderbookLevel], levels: usize) -> Vec<PriceLevelStrength> {
    let mut ranked: Vec<PriceLevelStrength> = side
        .iter()
        .take(levels)
        .map(|l| PriceLevelStrength {
            price: l.price,
            strength: l.quantity,
        })
        .collect();
    ranked.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    ranked.truncate(3);
    ranked
}
