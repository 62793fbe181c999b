//! Upstream error taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream rate limit reached (HTTP 429)")]
    RateLimited,

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Throttling and transient failures may succeed later; a bad shape will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::RateLimited | UpstreamError::Unavailable(_))
    }

    /// HTTP status the boundary layer should answer with.
    pub fn status_hint(&self) -> u16 {
        match self {
            UpstreamError::RateLimited => 429,
            UpstreamError::Unavailable(_) => 503,
            UpstreamError::Malformed(_) => 502,
        }
    }
}
