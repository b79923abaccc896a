//! Collection errors with retry classification

use thiserror::Error;

/// Whether retrying an operation can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, connection resets, throttling
    Retryable,
    /// Structural changes, rejected requests, integrity violations
    NonRetryable,
}

/// Errors raised while fetching or parsing records from the external source
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollectError {
    /// Network failure or timeout; retried with backoff
    #[error("Transient fetch error: {reason}")]
    Transient { reason: String },

    /// The source answered with a shape we cannot read
    #[error("Parse error: {reason}")]
    Parse { reason: String },

    /// The source rejected the request outright
    #[error("Unexpected status {status}: {reason}")]
    Status { status: u16, reason: String },

    /// Shutdown was requested while the fetch was in flight
    #[error("Fetch cancelled by shutdown")]
    Cancelled,
}

impl CollectError {
    pub fn transient(reason: impl Into<String>) -> Self {
        CollectError::Transient {
            reason: reason.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        CollectError::Parse {
            reason: reason.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            CollectError::Transient { .. } => FailureClass::Retryable,
            CollectError::Parse { .. } => FailureClass::NonRetryable,
            CollectError::Status { .. } => FailureClass::NonRetryable,
            CollectError::Cancelled => FailureClass::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }

    /// Short code for log lines and cycle summaries
    pub fn error_code(&self) -> &'static str {
        match self {
            CollectError::Transient { .. } => "ERR_TRANSIENT_FETCH",
            CollectError::Parse { .. } => "ERR_PARSE",
            CollectError::Status { .. } => "ERR_STATUS",
            CollectError::Cancelled => "ERR_CANCELLED",
        }
    }
}

pub type CollectResult<T> = Result<T, CollectError>;
