//! Gateway payload definitions
//!
//! Typed payload structures for both directions of the handshake and the
//! client-sent commands.

use chat_core::Intents;
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
///
/// Sent by the client to start a fresh session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,
    /// Client properties
    pub properties: IdentifyProperties,
    /// Gateway intents bitmask
    pub intents: Intents,
    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
    /// Whether the connection uses zlib-stream compression
    #[serde(default)]
    pub compress: bool,
}

/// Client connection properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,
    /// Library or browser name
    pub browser: String,
    /// Device name
    pub device: String,
}

impl IdentifyProperties {
    /// Properties describing this library
    #[must_use]
    pub fn library() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "chat-client".to_string(),
            device: "chat-client".to_string(),
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::library()
    }
}

/// Payload for op 6 (Resume)
///
/// Sent by the client to continue a disconnected session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,
    /// Session ID to resume
    pub session_id: String,
    /// Last received sequence number
    pub seq: u64,
}

/// Dispatch payload for the READY event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Gateway protocol version
    pub v: u32,
    /// Session id for later resumes
    pub session_id: String,
    /// URL to resume against, when the server provides one
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Payload for op 3 (Presence Update)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    /// New status (online, idle, dnd, offline)
    pub status: String,
    /// Whether the client is AFK
    #[serde(default)]
    pub afk: bool,
}

impl PresenceUpdatePayload {
    /// Valid status values
    pub const VALID_STATUSES: &'static [&'static str] = &["online", "idle", "dnd", "offline"];

    /// Check if the status is valid
    #[must_use]
    pub fn is_valid_status(&self) -> bool {
        Self::VALID_STATUSES.contains(&self.status.as_str())
    }
}

/// Payload for op 4 (Voice State Update)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateUpdatePayload {
    /// Guild to act in
    pub guild_id: String,
    /// Channel to join, None to disconnect
    pub channel_id: Option<String>,
    /// Whether the client is muted
    #[serde(default)]
    pub self_mute: bool,
    /// Whether the client is deafened
    #[serde(default)]
    pub self_deaf: bool,
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    /// Guild to chunk
    pub guild_id: String,
    /// Username prefix filter; empty requests everyone
    #[serde(default)]
    pub query: String,
    /// Maximum members to return; 0 means no cap
    #[serde(default)]
    pub limit: u32,
}
