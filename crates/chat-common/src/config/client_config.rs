//! Client configuration structs
//!
//! Loads configuration from environment variables or is built in code.

use chat_core::Intents;
use serde::Deserialize;
use std::env;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Raw bot token presented to the API and gateway
    pub token: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ratelimit: RatelimitConfig,
}

/// REST API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Gateway connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Gateway URL; fetched from the API when absent
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub intents: Intents,
    /// Pinned shard count; the recommended count is used when absent
    #[serde(default)]
    pub shard_count: Option<u32>,
    /// Subset of shard ids to run from the configured count
    #[serde(default)]
    pub shard_ids: Option<Vec<u32>>,
    #[serde(default = "default_hello_timeout")]
    pub hello_timeout_secs: u64,
    #[serde(default = "default_identify_timeout")]
    pub identify_timeout_secs: u64,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RatelimitConfig {
    /// Requests per second across all routes; None means no fixed global limit
    #[serde(default)]
    pub global_limit: Option<u32>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

// Default value functions
fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    concat!("chat-client/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_hello_timeout() -> u64 {
    10
}

fn default_identify_timeout() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            intents: Intents::default(),
            shard_count: None,
            shard_ids: None,
            hello_timeout_secs: default_hello_timeout(),
            identify_timeout_secs: default_identify_timeout(),
        }
    }
}

impl Default for RatelimitConfig {
    fn default() -> Self {
        Self {
            global_limit: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api: ApiConfig::default(),
            gateway: GatewayConfig::default(),
            ratelimit: RatelimitConfig::default(),
        }
    }

    /// Set the gateway intents
    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.gateway.intents = intents;
        self
    }

    /// Pin the shard count instead of using the recommendation
    #[must_use]
    pub fn with_shard_count(mut self, count: u32) -> Self {
        self.gateway.shard_count = Some(count);
        self
    }

    /// Override the API base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.base_url = base_url.into();
        self
    }

    /// Override the gateway URL instead of fetching it from the API
    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway.url = Some(url.into());
        self
    }

    /// Set a fixed global request-per-second limit
    #[must_use]
    pub fn with_global_limit(mut self, limit: u32) -> Self {
        self.ratelimit.global_limit = Some(limit);
        self
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            token: env::var("CHAT_TOKEN").map_err(|_| ConfigError::MissingVar("CHAT_TOKEN"))?,
            api: ApiConfig {
                base_url: env::var("CHAT_API_URL").unwrap_or_else(|_| default_base_url()),
                request_timeout_secs: env::var("CHAT_API_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_request_timeout),
                max_retries: env::var("CHAT_API_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_max_retries),
                user_agent: env::var("CHAT_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
            },
            gateway: GatewayConfig {
                url: env::var("CHAT_GATEWAY_URL").ok(),
                intents: env::var("CHAT_INTENTS")
                    .ok()
                    .and_then(|s| Intents::parse(&s).ok())
                    .unwrap_or_default(),
                shard_count: env::var("CHAT_SHARD_COUNT")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                shard_ids: env::var("CHAT_SHARD_IDS").ok().map(|s| {
                    s.split(',')
                        .filter_map(|part| part.trim().parse().ok())
                        .collect()
                }),
                hello_timeout_secs: env::var("CHAT_HELLO_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_hello_timeout),
                identify_timeout_secs: env::var("CHAT_IDENTIFY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_identify_timeout),
            },
            ratelimit: RatelimitConfig {
                global_limit: env::var("CHAT_GLOBAL_RATELIMIT")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                sweep_interval_secs: env::var("CHAT_RATELIMIT_SWEEP_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_sweep_interval),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
