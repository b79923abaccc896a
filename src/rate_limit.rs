use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;

/// Rate limiter configuration
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum requests per minute to the external source
    pub requests_per_minute: u32,
    /// Requests allowed back to back before spacing kicks in
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            burst: 1,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    #[error("requests per minute must be non-zero")]
    ZeroRate,
}

/// Process-wide limiter shared by every collector
pub type SourceRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new rate limiter
///
/// A burst of zero is treated as one.
pub fn create_rate_limiter(config: RateLimiterConfig) -> Result<SourceRateLimiter, RateLimitError> {
    let per_minute = NonZeroU32::new(config.requests_per_minute).ok_or(RateLimitError::ZeroRate)?;
    let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_minute(per_minute).allow_burst(burst);
    Ok(Arc::new(RateLimiter::direct(quota)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_rate_limiter(RateLimiterConfig {
            requests_per_minute: 50,
            burst: 1,
        })
        .unwrap();

        // First request passes, the second has to wait for the next slot
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let result = create_rate_limiter(RateLimiterConfig {
            requests_per_minute: 0,
            burst: 1,
        });
        assert_eq!(result.err(), Some(RateLimitError::ZeroRate));
    }

    #[test]
    fn test_default_config() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.requests_per_minute, 30);
        assert_eq!(config.burst, 1);
    }

    #[tokio::test]
    async fn test_until_ready_spaces_requests() {
        // 600/min = one slot every 100ms
        let limiter = create_rate_limiter(RateLimiterConfig {
            requests_per_minute: 600,
            burst: 1,
        })
        .unwrap();

        let start = Instant::now();
        for _ in 0..3 {
            limiter.until_ready().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(180));
    }
}
