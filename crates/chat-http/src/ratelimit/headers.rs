//! Rate limit response headers
//!
//! Parses the `X-RateLimit-*` family into typed fields. Absent headers parse
//! to `None`; a response with none of the core trio means the route carries
//! no rate limit at all.

use reqwest::header::HeaderMap;
use std::time::Duration;

/// Typed view over the rate limit response headers
#[derive(Debug, Clone, Default)]
pub struct RatelimitHeaders {
    /// `X-RateLimit-Limit`: total calls per window
    pub limit: Option<u64>,
    /// `X-RateLimit-Remaining`: calls left in the current window
    pub remaining: Option<u64>,
    /// `X-RateLimit-Reset`: unix timestamp when the window resets
    pub reset: Option<f64>,
    /// `X-RateLimit-Reset-After`: seconds until the window resets
    pub reset_after: Option<Duration>,
    /// `X-RateLimit-Bucket`: server-issued bucket hash
    pub bucket: Option<String>,
    /// `X-RateLimit-Scope`: `user`, `shared`, or `global` on a 429
    pub scope: Option<String>,
    /// `Retry-After`: seconds to back off, sent with 429s
    pub retry_after: Option<Duration>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name).and_then(|value| value.trim().parse().ok())
}

fn header_secs(headers: &HeaderMap, name: &str) -> Option<Duration> {
    header_parse::<f64>(headers, name)
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

impl RatelimitHeaders {
    /// Parse the rate limit headers out of a response header map
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            limit: header_parse(headers, "x-ratelimit-limit"),
            remaining: header_parse(headers, "x-ratelimit-remaining"),
            reset: header_parse(headers, "x-ratelimit-reset"),
            reset_after: header_secs(headers, "x-ratelimit-reset-after"),
            bucket: header_str(headers, "x-ratelimit-bucket").map(str::to_string),
            scope: header_str(headers, "x-ratelimit-scope").map(str::to_string),
            retry_after: header_secs(headers, "retry-after"),
        }
    }

    /// Whether the response carried the core quota headers
    #[must_use]
    pub fn has_ratelimit_info(&self) -> bool {
        self.limit.is_some() && self.remaining.is_some() && self.reset_after.is_some()
    }

    /// Whether a 429 reported a global breach
    #[must_use]
    pub fn is_global_scope(&self) -> bool {
        self.scope.as_deref() == Some("global")
    }
}
