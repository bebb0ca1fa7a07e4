pub mod pnl;
pub mod position_manager;
pub mod strategies;
