//! Single-symbol trading bot for the WOOX exchange.
//!
//! The engine polls public market data, evaluates pluggable entry/exit
//! strategies over a rolling price window, manages a single position
//! through a guarded state machine, and records executed trades to a SQLite
//! ledger for PnL reporting. An HTTP API exposes state and manual control
//! for the dashboard.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
