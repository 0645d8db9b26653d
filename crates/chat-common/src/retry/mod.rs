//! Retry and backoff policies

mod policy;

pub use policy::RetryPolicy;
