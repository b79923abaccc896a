//! Source Collectors
//!
//! One collector per external source. A collector turns the pages a
//! [`PageSource`] returns into [`RawRecord`]s for a single model; it never
//! writes to the store. Every request goes through the shared rate limiter
//! and the retry policy held by the [`CycleContext`].

pub mod leaderboard;
pub mod model_chat;
pub mod normalize;
pub mod trade_history;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};

use crate::domain::entities::{ModelRef, RawRecord, SourceKind};
use crate::domain::errors::{CollectError, CollectResult};
use crate::domain::repositories::{PageRequest, PageSource};
use crate::rate_limit::SourceRateLimiter;
use crate::task_runner::{retry_with_backoff, RetryPolicy};

pub use leaderboard::LeaderboardCollector;
pub use model_chat::ModelChatCollector;
pub use trade_history::TradeHistoryCollector;

/// A source variant able to produce records for one model
#[async_trait]
pub trait Collector: Send + Sync {
    fn source(&self) -> SourceKind;

    /// Fetch and normalise everything this source has for `model`
    async fn collect(&self, model: &ModelRef, ctx: &CycleContext)
        -> CollectResult<Vec<RawRecord>>;
}

/// The three standard collectors, in persistence order
pub fn default_collectors() -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(LeaderboardCollector),
        Arc::new(TradeHistoryCollector),
        Arc::new(ModelChatCollector),
    ]
}

/// Everything a collector needs during one cycle
pub struct CycleContext {
    source: Arc<dyn PageSource>,
    limiter: SourceRateLimiter,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    started_at: DateTime<Utc>,
    chat_limit: usize,
    listing: OnceCell<serde_json::Value>,
}

impl CycleContext {
    pub fn new(
        source: Arc<dyn PageSource>,
        limiter: SourceRateLimiter,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
        chat_limit: usize,
    ) -> Self {
        Self {
            source,
            limiter,
            retry,
            shutdown,
            started_at: Utc::now(),
            chat_limit,
            listing: OnceCell::new(),
        }
    }

    /// Cycle start, used when a page carries no timestamp of its own
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn chat_limit(&self) -> usize {
        self.chat_limit
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Fetch one page through the rate limiter, retrying transient failures.
    ///
    /// Resolves to `Cancelled` as soon as shutdown is signalled, even while
    /// waiting on the limiter or the source.
    pub async fn fetch(&self, request: &PageRequest) -> CollectResult<serde_json::Value> {
        let task_name = format!("{} {}", self.source.name(), request);
        retry_with_backoff(&task_name, &self.retry, || async {
            if self.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            let attempt = async {
                self.limiter.until_ready().await;
                self.source.fetch(request).await
            };
            tokio::select! {
                biased;
                _ = wait_for_shutdown(self.shutdown.clone()) => Err(CollectError::Cancelled),
                result = attempt => result,
            }
        })
        .await
    }

    /// The leaderboard listing, fetched at most once per cycle
    pub async fn listing(&self) -> CollectResult<&serde_json::Value> {
        self.listing
            .get_or_try_init(|| self.fetch(&PageRequest::Leaderboard))
            .await
    }
}

/// Resolves once shutdown has been signalled; never if the sender is gone
pub(crate) async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::rate_limit::{create_rate_limiter, RateLimiterConfig};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves canned pages keyed by request display string
    pub struct CannedSource {
        pages: Mutex<HashMap<String, Vec<CollectResult<serde_json::Value>>>>,
        pub calls: AtomicUsize,
    }

    impl CannedSource {
        pub fn new() -> Self {
            Self {
                pages: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            }
        }

        /// Queue responses for a request; the last one repeats
        pub fn respond(
            self,
            request: &PageRequest,
            responses: Vec<CollectResult<serde_json::Value>>,
        ) -> Self {
            self.pages
                .lock()
                .unwrap()
                .insert(request.to_string(), responses);
            self
        }
    }

    #[async_trait]
    impl PageSource for CannedSource {
        fn name(&self) -> &str {
            "canned"
        }

        async fn fetch(&self, request: &PageRequest) -> CollectResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().unwrap();
            match pages.get_mut(&request.to_string()) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => Err(CollectError::Status {
                    status: 404,
                    reason: format!("no page for {}", request),
                }),
            }
        }
    }

    pub fn context(source: Arc<CannedSource>) -> (CycleContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let limiter = create_rate_limiter(RateLimiterConfig {
            requests_per_minute: 6_000,
            burst: 100,
        })
        .unwrap();
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        };
        (CycleContext::new(source, limiter, retry, rx, 200), tx)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_listing_is_fetched_once() {
        let source = Arc::new(
            CannedSource::new()
                .respond(&PageRequest::Leaderboard, vec![Ok(json!({ "leaderboard": [] }))]),
        );
        let (ctx, _tx) = context(source.clone());

        ctx.listing().await.unwrap();
        ctx.listing().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_retries_transient_errors() {
        let source = CannedSource::new().respond(
            &PageRequest::Leaderboard,
            vec![
                Err(CollectError::transient("reset")),
                Ok(json!({ "leaderboard": [] })),
            ],
        );
        let (ctx, _tx) = context(Arc::new(source));
        assert!(ctx.fetch(&PageRequest::Leaderboard).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_after_shutdown_is_cancelled() {
        let source = CannedSource::new()
            .respond(&PageRequest::Leaderboard, vec![Ok(json!([]))]);
        let (ctx, tx) = context(Arc::new(source));
        tx.send(true).unwrap();

        let result = ctx.fetch(&PageRequest::Leaderboard).await;
        assert_eq!(result, Err(CollectError::Cancelled));
    }

    #[test]
    fn test_default_collectors_cover_every_source() {
        let kinds: Vec<SourceKind> = default_collectors().iter().map(|c| c.source()).collect();
        assert_eq!(kinds, SourceKind::ALL.to_vec());
    }
}
