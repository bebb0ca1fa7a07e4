pub mod retry;
pub mod woox_client;
