//! HTTP client error types

use crate::ratelimit::AcquireError;
use serde::Deserialize;

/// Error envelope the API returns alongside 4xx/5xx statuses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    /// Platform error code
    #[serde(default)]
    pub code: Option<u32>,
    /// Human readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{message} (code {code})"),
            (None, Some(message)) => write!(f, "{message}"),
            (Some(code), None) => write!(f, "code {code}"),
            (None, None) => write!(f, "no error body"),
        }
    }
}

/// Errors surfaced by the HTTP client
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The caller opted out of waiting and the rate limit is exhausted
    #[error("Rate limited and waiting was not requested")]
    RateLimited,

    /// The client or its rate limit storage has been closed
    #[error("HTTP client is closed")]
    Closed,

    /// Transport-level failure that survived the retry budget
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded as the expected type
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The server rejected the request with a typed error
    #[error("API error (status {status}): {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Decoded error envelope
        body: ApiErrorBody,
    },

    /// A status code outside the classified set
    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    /// 429 retries were exhausted; likely a client bug or a clustering
    /// collision on the same token
    #[error("Rate limiting failed for {route} after {attempts} attempts")]
    RatelimitExhausted {
        /// Route template the retries were spent on
        route: String,
        /// Number of attempts made
        attempts: u32,
    },
}

impl From<AcquireError> for HttpError {
    fn from(error: AcquireError) -> Self {
        match error {
            AcquireError::RateLimited => Self::RateLimited,
            AcquireError::Closed => Self::Closed,
        }
    }
}
