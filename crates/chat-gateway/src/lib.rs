//! # chat-gateway
//!
//! Realtime gateway client. A [`shard::Shard`] owns one persistent
//! connection with the full connect/identify/resume handshake, heartbeat
//! liveness detection, zlib-stream decompression, and a close-code driven
//! recovery state machine. The [`manager::ShardManager`] owns the shard set,
//! the IDENTIFY rate limiter shared across shards, and live rescaling.

pub mod compression;
pub mod error;
pub mod events;
pub mod limiter;
pub mod manager;
pub mod protocol;
pub mod shard;

// Re-export commonly used types at crate root
pub use compression::Inflater;
pub use error::{CompressionError, ManagerError, ShardError};
pub use events::{CriticalEvent, DispatchEvent};
pub use limiter::{CommandBudget, IdentifyLimiter};
pub use manager::ShardManager;
pub use protocol::{CloseCode, ClosePolicy, GatewayMessage, OpCode};
pub use shard::{SessionState, Shard, ShardConfig, ShardPhase};
