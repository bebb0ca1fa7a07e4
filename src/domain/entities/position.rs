//! Directional position held by the bot. At most one exists at a time.

use serde::{Deserialize, Serialize};

use crate::domain::errors::PositionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    pub fn parse(value: &str) -> Result<Side, PositionError> {
        match value.trim().to_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(PositionError::InvalidSide(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    /// Epoch seconds when the position was opened.
    pub open_time: f64,
}

impl Position {
    pub fn new(side: Side, quantity: f64, entry_price: f64, open_time: f64) -> Self {
        Position {
            side,
            quantity,
            entry_price,
            open_time,
        }
    }

    /// Unrealized PnL in quote currency at the given price.
    pub fn pnl(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - current_price) * self.quantity,
        }
    }

    /// Unrealized PnL as a percentage of the entry price.
    pub fn pnl_percent(&self, current_price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        let change = ((current_price - self.entry_price) / self.entry_price) * 100.0;
        match self.side {
            Side::Long => change,
            Side::Short => -change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_pnl() {
        let pos = Position::new(Side::Long, 2.0, 100.0, 0.0);
        assert_eq!(pos.pnl(110.0), 20.0);
        assert_eq!(pos.pnl_percent(110.0), 10.0);
        assert_eq!(pos.pnl_percent(95.0), -5.0);
    }

    #[test]
    fn test_short_pnl() {
        let pos = Position::new(Side::Short, 1.0, 100.0, 0.0);
        assert_eq!(pos.pnl(90.0), 10.0);
        assert_eq!(pos.pnl_percent(90.0), 10.0);
        assert_eq!(pos.pnl_percent(103.0), -3.0);
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("LONG").unwrap(), Side::Long);
        assert_eq!(Side::parse("sell").unwrap(), Side::Short);
        assert!(Side::parse("sideways").is_err());
        assert_eq!(Side::Long.opposite(), Side::Short);
    }
}
