//! Configuration structs

mod client_config;

pub use client_config::{
    ApiConfig, ClientConfig, ConfigError, GatewayConfig, RatelimitConfig,
};
