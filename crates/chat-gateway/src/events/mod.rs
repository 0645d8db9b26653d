//! Gateway event types
//!
//! What the shard hands to listeners: named dispatch events and the critical
//! conditions that stop a shard instead of reconnecting it.

use serde_json::Value;

/// One named event dispatched by the server
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// Shard the event arrived on
    pub shard_id: u32,
    /// Sequence number, when the server sent one
    pub sequence: Option<u64>,
    /// Raw event data
    pub data: Value,
}

/// Fatal conditions surfaced to the manager
///
/// None of these auto-reconnect; the shard stays down until the manager
/// decides what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalEvent {
    /// Token was rejected (close 4004)
    AuthenticationFailed { shard_id: u32 },
    /// Shard configuration rejected (close 4010/4011)
    InvalidShardCount { shard_id: u32 },
    /// API version no longer accepted (close 4012)
    InvalidApiVersion { shard_id: u32 },
    /// Intents bitmask is malformed (close 4013)
    InvalidIntents { shard_id: u32 },
    /// Intents the bot is not approved for (close 4014)
    DisallowedIntents { shard_id: u32 },
    /// Close code outside the recovery table
    UnhandledClose { shard_id: u32, code: u16 },
}

impl CriticalEvent {
    /// Map a fatal close code onto its critical event
    ///
    /// Returns `None` for codes the recovery table handles by reconnecting.
    #[must_use]
    pub fn from_close_code(shard_id: u32, code: u16) -> Option<Self> {
        match code {
            4004 => Some(Self::AuthenticationFailed { shard_id }),
            4010 | 4011 => Some(Self::InvalidShardCount { shard_id }),
            4012 => Some(Self::InvalidApiVersion { shard_id }),
            4013 => Some(Self::InvalidIntents { shard_id }),
            4014 => Some(Self::DisallowedIntents { shard_id }),
            _ => None,
        }
    }

    /// Shard the event originated from
    #[must_use]
    pub const fn shard_id(&self) -> u32 {
        match self {
            Self::AuthenticationFailed { shard_id }
            | Self::InvalidShardCount { shard_id }
            | Self::InvalidApiVersion { shard_id }
            | Self::InvalidIntents { shard_id }
            | Self::DisallowedIntents { shard_id }
            | Self::UnhandledClose { shard_id, .. } => *shard_id,
        }
    }

    /// Short name used as the dispatch key
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::InvalidShardCount { .. } => "invalid_shard_count",
            Self::InvalidApiVersion { .. } => "invalid_api_version",
            Self::InvalidIntents { .. } => "invalid_intents",
            Self::DisallowedIntents { .. } => "disallowed_intents",
            Self::UnhandledClose { .. } => "unhandled_close",
        }
    }
}

impl std::fmt::Display for CriticalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnhandledClose { shard_id, code } => {
                write!(f, "unhandled_close(code={code}) on shard {shard_id}")
            }
            other => write!(f, "{} on shard {}", other.name(), other.shard_id()),
        }
    }
}
