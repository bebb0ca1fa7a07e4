//! Bounded retry policy for exchange calls.

use std::time::Duration;

use crate::domain::errors::ExchangeError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Fail,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Decide whether the attempt (0-based) should be retried. Rate limits
    /// and transient server/transport errors retry while attempts remain;
    /// everything else fails immediately.
    pub fn classify(&self, error: &ExchangeError, attempt: u32) -> RetryDecision {
        if attempt + 1 >= self.max_attempts || !error.is_retryable() {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry(error.retry_delay(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_until_exhausted() {
        let policy = RetryPolicy::default();
        let error = ExchangeError::RateLimit("slow down".into());
        assert!(matches!(policy.classify(&error, 0), RetryDecision::Retry(_)));
        assert!(matches!(policy.classify(&error, 1), RetryDecision::Retry(_)));
        assert_eq!(policy.classify(&error, 2), RetryDecision::Fail);
    }

    #[test]
    fn test_fatal_errors_never_retry() {
        let policy = RetryPolicy::default();
        let auth = ExchangeError::Authentication("bad key".into());
        assert_eq!(policy.classify(&auth, 0), RetryDecision::Fail);
        let param = ExchangeError::InvalidParameter("qty".into());
        assert_eq!(policy.classify(&param, 0), RetryDecision::Fail);
    }

    #[test]
    fn test_backoff_shapes() {
        let policy = RetryPolicy { max_attempts: 10 };
        let rate = ExchangeError::RateLimit("x".into());
        assert_eq!(
            policy.classify(&rate, 0),
            RetryDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            policy.classify(&rate, 3),
            RetryDecision::Retry(Duration::from_secs(16))
        );

        let server = ExchangeError::Server("x".into());
        assert_eq!(
            policy.classify(&server, 0),
            RetryDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            policy.classify(&server, 8),
            RetryDecision::Retry(Duration::from_secs(10))
        );
    }
}
