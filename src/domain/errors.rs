//! Error taxonomy for the trading bot.
//!
//! Exchange errors are classified from WOOX API error codes so the gateway
//! can decide what is retryable. Authentication and parameter errors always
//! propagate immediately.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the exchange gateway.
#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("exchange error [{code}]: {message}")]
    Api { code: i64, message: String },
}

impl ExchangeError {
    /// Map a WOOX API error code to the matching variant.
    pub fn from_code(code: i64, message: String) -> Self {
        match code {
            -1001 | -1002 => ExchangeError::Authentication(message),
            -1003 => ExchangeError::RateLimit(message),
            -1004 | -1005 | -1008 | -1103 => ExchangeError::InvalidParameter(message),
            -1006 => ExchangeError::NotFound(message),
            -1000 | -1011 | -1012 => ExchangeError::Server(message),
            _ => ExchangeError::Api { code, message },
        }
    }

    /// Whether a retry can be expected to help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimit(_) | ExchangeError::Server(_) | ExchangeError::Transport(_)
        )
    }

    /// Suggested delay before the given retry attempt (0-based).
    ///
    /// Rate limits back off exponentially (capped at 60s), server and
    /// transport errors linearly (capped at 10s).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        match self {
            ExchangeError::RateLimit(_) => {
                Duration::from_secs(2u64.saturating_pow(attempt + 1).min(60))
            }
            ExchangeError::Server(_) | ExchangeError::Transport(_) => {
                Duration::from_secs((2 * (attempt as u64 + 1)).min(10))
            }
            _ => Duration::from_secs(1),
        }
    }

    /// Short user-facing message for the dashboard.
    pub fn user_message(&self) -> String {
        match self {
            ExchangeError::Authentication(_) => {
                "Authentication failed. Please check your API credentials.".to_string()
            }
            ExchangeError::RateLimit(_) => {
                "Rate limit exceeded. Please wait before retrying.".to_string()
            }
            ExchangeError::InvalidParameter(m) => format!("Invalid request: {}", m),
            ExchangeError::NotFound(m) => format!("Resource not found: {}", m),
            other => format!("API error: {}", other),
        }
    }
}

/// Errors from position state machine transitions.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("cannot open - already holding a position")]
    AlreadyOpen,

    #[error("cannot close - no position held")]
    NoPosition,

    #[error("short positions are not supported for spot symbols")]
    ShortNotSupported,

    #[error("invalid side: {0} (must be 'long' or 'short')")]
    InvalidSide(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] crate::persistence::DatabaseError),
}

/// Raised when a strategy name does not resolve in the registry.
#[derive(Debug, Error)]
#[error("unknown strategy: {name}. available strategies: {available}")]
pub struct UnknownStrategy {
    pub name: String,
    pub available: String,
}

/// Errors from the trading engine control surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bot is not running")]
    NotRunning,

    #[error("bot is already running")]
    AlreadyRunning,

    #[error("no market data available yet")]
    NoMarketData,

    #[error(transparent)]
    Strategy(#[from] UnknownStrategy),

    #[error(transparent)]
    Position(#[from] PositionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert!(matches!(
            ExchangeError::from_code(-1002, "bad key".into()),
            ExchangeError::Authentication(_)
        ));
        assert!(matches!(
            ExchangeError::from_code(-1003, "slow down".into()),
            ExchangeError::RateLimit(_)
        ));
        assert!(matches!(
            ExchangeError::from_code(-1005, "bad qty".into()),
            ExchangeError::InvalidParameter(_)
        ));
        assert!(matches!(
            ExchangeError::from_code(-1011, "rpc timeout".into()),
            ExchangeError::Server(_)
        ));
        assert!(matches!(
            ExchangeError::from_code(317161, "unmapped".into()),
            ExchangeError::Api { code: 317161, .. }
        ));
    }

    #[test]
    fn test_retryability() {
        assert!(ExchangeError::RateLimit("x".into()).is_retryable());
        assert!(ExchangeError::Server("x".into()).is_retryable());
        assert!(ExchangeError::Transport("x".into()).is_retryable());
        assert!(!ExchangeError::Authentication("x".into()).is_retryable());
        assert!(!ExchangeError::InvalidParameter("x".into()).is_retryable());
        assert!(!ExchangeError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_retry_delays() {
        let rate = ExchangeError::RateLimit("x".into());
        assert_eq!(rate.retry_delay(0), Duration::from_secs(2));
        assert_eq!(rate.retry_delay(1), Duration::from_secs(4));
        assert_eq!(rate.retry_delay(10), Duration::from_secs(60));

        let server = ExchangeError::Server("x".into());
        assert_eq!(server.retry_delay(0), Duration::from_secs(2));
        assert_eq!(server.retry_delay(1), Duration::from_secs(4));
        assert_eq!(server.retry_delay(9), Duration::from_secs(10));
    }
}
