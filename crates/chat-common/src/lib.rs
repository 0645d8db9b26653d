//! # chat-common
//!
//! Shared utilities including configuration, credentials, telemetry, and
//! retry policies.

pub mod auth;
pub mod config;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::AuthToken;
pub use config::{ApiConfig, ClientConfig, ConfigError, GatewayConfig, RatelimitConfig};
pub use retry::RetryPolicy;
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
