pub mod entities;
pub mod errors;
pub mod market_state;
pub mod repositories;
pub mod services;
