//! HTTP page source
//!
//! Talks to the competition site's JSON endpoints. Only the transport lives
//! here; rate limiting and retries are applied by the caller.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::TrackerConfig;
use crate::domain::errors::{CollectError, CollectResult};
use crate::domain::repositories::{PageRequest, PageSource};

const USER_AGENT: &str = concat!("nof1-tracker/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum PageSourceError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct HttpPageSource {
    client: Client,
    base_url: Url,
}

impl HttpPageSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PageSourceError> {
        let mut base_url = Url::parse(base_url).map_err(|e| PageSourceError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PageSourceError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self, PageSourceError> {
        Self::new(&config.base_url, config.request_timeout())
    }

    /// Absolute URL for a request
    pub fn url_for(&self, request: &PageRequest) -> CollectResult<Url> {
        let (path, model) = match request {
            PageRequest::Leaderboard => ("api/leaderboard", None),
            PageRequest::Trades { model } => ("api/trades", Some(model)),
            PageRequest::Chats { model } => ("api/conversations", Some(model)),
        };

        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| CollectError::parse(format!("cannot build URL for {}: {}", request, e)))?;
        if let Some(model) = model {
            url.query_pairs_mut()
                .append_pair("model_id", &model.external_id);
        }
        Ok(url)
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, request: &PageRequest) -> CollectResult<serde_json::Value> {
        let url = self.url_for(request)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| CollectError::transient(format!("{}: {}", request, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(classify_status(status, reason));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CollectError::transient(format!("{}: reading body: {}", request, e)))?;

        serde_json::from_slice(&body)
            .map_err(|e| CollectError::parse(format!("{}: invalid JSON: {}", request, e)))
    }
}

/// Throttling and server errors are worth retrying, anything else is not
fn classify_status(status: StatusCode, reason: String) -> CollectError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollectError::transient(format!("HTTP {}: {}", status.as_u16(), reason))
    } else {
        CollectError::Status {
            status: status.as_u16(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ModelRef;

    #[test]
    fn test_urls_for_each_page() {
        let source = HttpPageSource::new("https://nof1.ai", Duration::from_secs(5)).unwrap();
        let model = ModelRef::new("Claude Sonnet 4.5", None, None);

        assert_eq!(
            source.url_for(&PageRequest::Leaderboard).unwrap().as_str(),
            "https://nof1.ai/api/leaderboard"
        );
        assert_eq!(
            source
                .url_for(&PageRequest::Trades {
                    model: model.clone()
                })
                .unwrap()
                .as_str(),
            "https://nof1.ai/api/trades?model_id=claude-sonnet-4.5"
        );
        assert_eq!(
            source
                .url_for(&PageRequest::Chats { model })
                .unwrap()
                .as_str(),
            "https://nof1.ai/api/conversations?model_id=claude-sonnet-4.5"
        );
    }

    #[test]
    fn test_base_path_is_kept() {
        let source = HttpPageSource::new("http://localhost:8080/proxy", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.url_for(&PageRequest::Leaderboard).unwrap().as_str(),
            "http://localhost:8080/proxy/api/leaderboard"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpPageSource::new("not a url", Duration::from_secs(5)),
            Err(PageSourceError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "gone".to_string()),
            CollectError::Status {
                status: 404,
                reason: "gone".to_string()
            }
        );
    }
}
