//! Error types for version searches.
//!
//! Compile failures are never errors here: a snippet that fails to build at
//! some version is normal search data (`ProbeOutcome::Fail`). This module
//! covers the service-level and session-level failures around it.

use thiserror::Error;

/// Result type alias for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur while probing the remote compile service or
/// driving a search session.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Network-level failure talking to the remote service
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The per-request timeout elapsed before a response arrived
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The remote service asked us to back off (HTTP 429)
    #[error("rate limited by remote service")]
    RateLimited { retry_after_secs: Option<f64> },

    /// The service answered but the body was not a usable compile result
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// Snippet source was empty; nothing to probe
    #[error("snippet source is empty")]
    EmptySnippet,

    /// The retry budget for one probe was exhausted on transient failures
    #[error("retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },

    /// The session was cancelled by the caller
    #[error("search cancelled")]
    Cancelled,
}

impl SearchError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Classify a reqwest failure into the search taxonomy.
    pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                seconds: timeout_secs,
            }
        } else {
            Self::Transport {
                message: err.to_string(),
            }
        }
    }

    /// Check if this error is retryable (transient failure).
    ///
    /// Matches the probe outcome contract: anything retryable maps to
    /// `ProbeOutcome::TransientError`, never to a compile `Fail`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::MalformedResponse { .. }
        )
    }
}
