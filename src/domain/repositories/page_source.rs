//! Page Source Trait
//!
//! The `PageSource` trait is the boundary to whatever actually talks to the
//! competition site (HTTP API, browser automation, recorded fixtures). The
//! collection pipeline only sees structured JSON payloads coming back from it.
//!
//! ## Contract
//! - One call fetches one page for at most one model
//! - Implementations bound each call with their own timeout
//! - Network failures and timeouts map to `CollectError::Transient`
//! - Payloads that cannot be decoded map to `CollectError::Parse`

use async_trait::async_trait;

use crate::domain::entities::ModelRef;
use crate::domain::errors::CollectResult;

/// A single page the pipeline can ask for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageRequest {
    /// Current standings of every participant
    Leaderboard,
    /// Trade history of one model
    Trades { model: ModelRef },
    /// Reasoning / decision log of one model
    Chats { model: ModelRef },
}

impl std::fmt::Display for PageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageRequest::Leaderboard => write!(f, "leaderboard"),
            PageRequest::Trades { model } => write!(f, "trades[{}]", model.external_id),
            PageRequest::Chats { model } => write!(f, "chats[{}]", model.external_id),
        }
    }
}

/// Upstream fetch layer
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Name of this source for logging purposes
    fn name(&self) -> &str;

    /// Fetch one page and return its structured payload verbatim
    async fn fetch(&self, request: &PageRequest) -> CollectResult<serde_json::Value>;
}
