//! Gateway message format
//!
//! The envelope every WebSocket message travels in, with constructors for
//! the client-sent commands and accessors for the server payloads.

use super::{
    HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ReadyPayload,
    RequestGuildMembersPayload, ResumePayload, VoiceStateUpdatePayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message format
///
/// All messages sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    fn command(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d,
        }
    }

    // === Client Commands ===

    /// Create a Heartbeat message (op=1) carrying the last seen sequence
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::command(
            OpCode::Heartbeat,
            last_sequence.map(|s| Value::Number(s.into())),
        )
    }

    /// Create an Identify message (op=2)
    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::command(OpCode::Identify, serde_json::to_value(payload).ok())
    }

    /// Create a Resume message (op=6)
    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self::command(OpCode::Resume, serde_json::to_value(payload).ok())
    }

    /// Create a Presence Update message (op=3)
    #[must_use]
    pub fn presence_update(payload: &PresenceUpdatePayload) -> Self {
        Self::command(OpCode::PresenceUpdate, serde_json::to_value(payload).ok())
    }

    /// Create a Voice State Update message (op=4)
    #[must_use]
    pub fn voice_state_update(payload: &VoiceStateUpdatePayload) -> Self {
        Self::command(OpCode::VoiceStateUpdate, serde_json::to_value(payload).ok())
    }

    /// Create a Request Guild Members message (op=8)
    #[must_use]
    pub fn request_guild_members(payload: &RequestGuildMembersPayload) -> Self {
        Self::command(
            OpCode::RequestGuildMembers,
            serde_json::to_value(payload).ok(),
        )
    }

    // === Parsing Server Messages ===

    /// Try to parse as a Hello payload (op=10)
    #[must_use]
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse a READY dispatch payload
    #[must_use]
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some("READY") {
            return None;
        }
        self.d
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse the Invalid Session resumable flag (op=9)
    #[must_use]
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IdentifyProperties;
    use chat_core::Intents;

    #[test]
    fn test_heartbeat_message() {
        let msg = GatewayMessage::heartbeat(Some(41));
        assert_eq!(msg.op, OpCode::Heartbeat);
        assert_eq!(msg.d, Some(Value::Number(41.into())));

        let null_seq = GatewayMessage::heartbeat(None);
        assert!(null_seq.d.is_none());
    }

    #[test]
    fn test_identify_message() {
        let payload = IdentifyPayload {
            token: "tok".to_string(),
            properties: IdentifyProperties::library(),
            intents: Intents::GUILDS,
            shard: [0, 1],
            compress: true,
        };
        let msg = GatewayMessage::identify(&payload);
        assert_eq!(msg.op, OpCode::Identify);
        assert_eq!(msg.d.as_ref().unwrap()["token"], "tok");
    }

    #[test]
    fn test_parse_hello() {
        let msg = GatewayMessage {
            op: OpCode::Hello,
            t: None,
            s: None,
            d: Some(serde_json::json!({"heartbeat_interval": 45000})),
        };
        let hello = msg.as_hello().unwrap();
        assert_eq!(hello.heartbeat_interval, 45_000);

        let not_hello = GatewayMessage::heartbeat(None);
        assert!(not_hello.as_hello().is_none());
    }

    #[test]
    fn test_parse_ready() {
        let msg = GatewayMessage {
            op: OpCode::Dispatch,
            t: Some("READY".to_string()),
            s: Some(1),
            d: Some(serde_json::json!({"v": 1, "session_id": "abc"})),
        };
        let ready = msg.as_ready().unwrap();
        assert_eq!(ready.session_id, "abc");

        let other = GatewayMessage {
            op: OpCode::Dispatch,
            t: Some("MESSAGE_CREATE".to_string()),
            s: Some(2),
            d: Some(serde_json::json!({})),
        };
        assert!(other.as_ready().is_none());
    }

    #[test]
    fn test_parse_invalid_session() {
        let resumable = GatewayMessage {
            op: OpCode::InvalidSession,
            t: None,
            s: None,
            d: Some(Value::Bool(true)),
        };
        assert_eq!(resumable.as_invalid_session(), Some(true));

        let missing_flag = GatewayMessage {
            op: OpCode::InvalidSession,
            t: None,
            s: None,
            d: None,
        };
        assert_eq!(missing_flag.as_invalid_session(), Some(false));
    }

    #[test]
    fn test_message_roundtrip() {
        let original = GatewayMessage {
            op: OpCode::Dispatch,
            t: Some("READY".to_string()),
            s: Some(1),
            d: Some(serde_json::json!({"v": 1})),
        };
        let json = original.to_json().unwrap();
        let parsed = GatewayMessage::from_json(&json).unwrap();

        assert_eq!(parsed.op, original.op);
        assert_eq!(parsed.t, original.t);
        assert_eq!(parsed.s, original.s);
    }

    #[test]
    fn test_message_display() {
        let dispatch = GatewayMessage {
            op: OpCode::Dispatch,
            t: Some("MESSAGE_CREATE".to_string()),
            s: Some(5),
            d: None,
        };
        let display = format!("{dispatch}");
        assert!(display.contains("MESSAGE_CREATE"));
        assert!(display.contains("s=5"));
    }
}
