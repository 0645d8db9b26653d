//! # chat-http
//!
//! REST client for the chat platform. Every request flows through the rate
//! limit layer: a per-route [`ratelimit::Bucket`] admits at most the
//! server-confirmed number of concurrent calls, and a cross-route global
//! limiter gates everything that is not explicitly exempt. The
//! [`client::HttpClient`] executor ties the two together with header feedback
//! and bounded 429 retries.

pub mod client;
pub mod error;
pub mod ratelimit;
pub mod routes;

// Re-export commonly used types at crate root
pub use client::{GatewayBotInfo, HttpClient, HttpClientBuilder, HttpResponse, Request, ResponseEvent, SessionStartLimit};
pub use error::{ApiErrorBody, HttpError};
pub use ratelimit::{
    AcquireError, Admission, Bucket, BucketMetadata, FixedGlobalLimiter, GlobalLimiter,
    RatelimitHeaders, RatelimitStorage, UnlimitedGlobalLimiter,
};
pub use routes::{MajorParams, Route};
