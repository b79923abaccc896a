use std::time::Duration;

use crate::rate_limit::RateLimiterConfig;
use crate::task_runner::RetryPolicy;

/// Collection and scheduling configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub requests_per_minute: u32,
    pub rate_burst: u32,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub model_fetch_timeout_seconds: u64, // Wall-clock bound for all fetches of one model
    pub refresh_interval_minutes: u64,
    pub max_models: usize,
    pub worker_pool_size: usize,
    pub cycle_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub season_label: String,
    pub season_initial_capital: f64,
    pub chat_limit: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            base_url: "https://nof1.ai".to_string(),
            request_timeout_ms: 30_000,
            requests_per_minute: 30,
            rate_burst: 1,
            max_attempts: 3,
            retry_base_ms: 500,
            retry_max_ms: 8_000,
            model_fetch_timeout_seconds: 60,
            refresh_interval_minutes: 15,
            max_models: 10,
            worker_pool_size: 3,
            cycle_timeout_seconds: 600, // 10 minutes
            shutdown_grace_seconds: 30,
            season_label: "1.5".to_string(),
            season_initial_capital: 10_000.0,
            chat_limit: 200,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> TrackerConfig {
        let mut config = TrackerConfig::default();

        if let Ok(url) = std::env::var("SCRAPER_BASE_URL") {
            match url::Url::parse(&url) {
                Ok(_) => config.base_url = url.trim_end_matches('/').to_string(),
                Err(e) => {
                    tracing::warn!(
                        "Invalid SCRAPER_BASE_URL '{}': {}, using default: {}",
                        url,
                        e,
                        config.base_url
                    );
                }
            }
        }

        if let Some(value) = parse_in_range("SCRAPER_TIMEOUT", 1_000u64..=300_000) {
            config.request_timeout_ms = value;
        }

        if let Some(value) = parse_in_range("SCRAPER_RATE_LIMIT", 1u32..=6_000) {
            config.requests_per_minute = value;
        }

        if let Some(value) = parse_in_range("SCRAPER_RATE_BURST", 1u32..=100) {
            config.rate_burst = value;
        }

        if let Some(value) = parse_in_range("SCRAPER_MAX_ATTEMPTS", 1u32..=10) {
            config.max_attempts = value;
        }

        if let Some(value) = parse_in_range("SCRAPER_RETRY_BASE_MS", 10u64..=60_000) {
            config.retry_base_ms = value;
        }

        if let Some(value) = parse_in_range("SCRAPER_RETRY_MAX_MS", 10u64..=300_000) {
            config.retry_max_ms = value;
        }

        if let Some(value) = parse_in_range("MODEL_FETCH_TIMEOUT_SECONDS", 1u64..=600) {
            config.model_fetch_timeout_seconds = value;
        }

        if let Some(value) = parse_in_range("REFRESH_INTERVAL", 1u64..=1_440) {
            config.refresh_interval_minutes = value;
        }

        if let Some(value) = parse_in_range("MAX_MODELS", 1usize..=100) {
            config.max_models = value;
        }

        if let Some(value) = parse_in_range("WORKER_POOL_SIZE", 1usize..=16) {
            config.worker_pool_size = value;
        }

        if let Some(value) = parse_in_range("CYCLE_TIMEOUT_SECONDS", 10u64..=7_200) {
            config.cycle_timeout_seconds = value;
        }

        if let Some(value) = parse_in_range("SHUTDOWN_GRACE_SECONDS", 0u64..=600) {
            config.shutdown_grace_seconds = value;
        }

        if let Ok(label) = std::env::var("SEASON_LABEL") {
            let label = label.trim();
            if label.is_empty() {
                tracing::warn!(
                    "Empty SEASON_LABEL, using default: {}",
                    config.season_label
                );
            } else {
                config.season_label = label.to_string();
            }
        }

        if let Ok(capital) = std::env::var("SEASON_INITIAL_CAPITAL") {
            match capital.parse::<f64>() {
                Ok(value) if value > 0.0 => config.season_initial_capital = value,
                _ => {
                    tracing::warn!(
                        "Invalid SEASON_INITIAL_CAPITAL '{}', using default: {}",
                        capital,
                        config.season_initial_capital
                    );
                }
            }
        }

        if let Some(value) = parse_in_range("CHAT_LIMIT", 1usize..=5_000) {
            config.chat_limit = value;
        }

        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes * 60)
    }

    pub fn model_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.model_fetch_timeout_seconds)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_minute: self.requests_per_minute,
            burst: self.rate_burst,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms.max(self.retry_base_ms)),
            jitter: true,
        }
    }
}

/// Read `key`, parse it and keep it only if it falls inside `range`
fn parse_in_range<T>(key: &str, range: std::ops::RangeInclusive<T>) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => Some(value),
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (must be between {} and {}), using default",
                key,
                value,
                range.start(),
                range.end()
            );
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default", key, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.requests_per_minute, 30);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_models, 10);
        assert_eq!(config.season_label, "1.5");
        assert_eq!(config.refresh_interval(), Duration::from_secs(15 * 60));
        assert_eq!(config.cycle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = TrackerConfig {
            retry_base_ms: 1_000,
            retry_max_ms: 100, // below base, clamped up
            ..TrackerConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.base_delay, Duration::from_millis(1_000));
        assert_eq!(policy.max_delay, Duration::from_millis(1_000));
    }

    #[test]
    fn test_parse_in_range_rejects_out_of_range() {
        std::env::set_var("NOF1_TEST_WORKERS_A", "64");
        assert_eq!(parse_in_range("NOF1_TEST_WORKERS_A", 1usize..=16), None);

        std::env::set_var("NOF1_TEST_WORKERS_B", "4");
        assert_eq!(parse_in_range("NOF1_TEST_WORKERS_B", 1usize..=16), Some(4));

        std::env::set_var("NOF1_TEST_WORKERS_C", "four");
        assert_eq!(parse_in_range("NOF1_TEST_WORKERS_C", 1usize..=16), None);

        assert_eq!(parse_in_range("NOF1_TEST_WORKERS_UNSET", 1usize..=16), None);
    }
}
