//! Rate limit coordination layer
//!
//! One [`Bucket`] per server-recognized rate limit scope, a
//! [`RatelimitStorage`] registry mapping routes to buckets and linking the
//! scopes the server reports as shared, and a [`GlobalLimiter`] gating every
//! non-exempt request across all routes.

mod bucket;
mod global;
mod headers;
mod queue;
mod storage;

pub use bucket::{AcquireError, Admission, Bucket, BucketMetadata};
pub use global::{FixedGlobalLimiter, GlobalLimiter, UnlimitedGlobalLimiter};
pub use headers::RatelimitHeaders;
pub use queue::TicketQueue;
pub use storage::RatelimitStorage;
