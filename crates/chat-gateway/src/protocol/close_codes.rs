//! WebSocket close codes
//!
//! Gateway-specific close codes and the recovery policy each one maps to.
//! This table is protocol contract: which codes resume, which force a fresh
//! identify, and which are fatal must match the server bit-exactly.

use serde::{Deserialize, Serialize};

/// Gateway WebSocket close codes
///
/// Sent when closing a connection to indicate the reason. 4006 is
/// deliberately undefined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding (JSON decode error)
    DecodeError = 4002,
    /// Sent payload before Identify
    NotAuthenticated = 4003,
    /// Invalid token provided
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Invalid sequence number for Resume
    InvalidSequence = 4007,
    /// Too many requests (rate limited)
    RateLimited = 4008,
    /// Session has timed out
    SessionTimeout = 4009,
    /// Invalid shard configuration
    InvalidShard = 4010,
    /// Sharding is required
    ShardingRequired = 4011,
    /// Invalid/outdated API version
    InvalidApiVersion = 4012,
    /// Invalid intents bitmask
    InvalidIntents = 4013,
    /// Intents the bot is not approved for
    DisallowedIntents = 4014,
}

/// What the shard should do after a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Reconnect keeping session id and sequence (resume)
    Resume,
    /// Clear the session first, then reconnect with a fresh identify
    Reidentify,
    /// Surface a critical event; never auto-retry
    Fatal,
    /// Not in the table; surface a critical event, then fail
    Unhandled,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Recovery policy for this close code
    #[must_use]
    pub const fn policy(self) -> ClosePolicy {
        match self {
            Self::UnknownError
            | Self::UnknownOpcode
            | Self::DecodeError
            | Self::NotAuthenticated
            | Self::AlreadyAuthenticated
            | Self::RateLimited => ClosePolicy::Resume,
            Self::InvalidSequence | Self::SessionTimeout => ClosePolicy::Reidentify,
            Self::AuthenticationFailed
            | Self::InvalidShard
            | Self::ShardingRequired
            | Self::InvalidApiVersion
            | Self::InvalidIntents
            | Self::DisallowedIntents => ClosePolicy::Fatal,
        }
    }

    /// Recovery policy for a raw close code
    ///
    /// The standard 1000-1999 range defaults to resume; anything else the
    /// table does not know is unhandled.
    #[must_use]
    pub fn policy_for(value: u16) -> ClosePolicy {
        match Self::from_u16(value) {
            Some(code) => code.policy(),
            None if (1000..=1999).contains(&value) => ClosePolicy::Resume,
            None => ClosePolicy::Unhandled,
        }
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence number",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::InvalidShard => "Invalid shard configuration",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }

    /// Get the name of this close code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::UnknownError => "UnknownError",
            Self::UnknownOpcode => "UnknownOpcode",
            Self::DecodeError => "DecodeError",
            Self::NotAuthenticated => "NotAuthenticated",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::AlreadyAuthenticated => "AlreadyAuthenticated",
            Self::InvalidSequence => "InvalidSequence",
            Self::RateLimited => "RateLimited",
            Self::SessionTimeout => "SessionTimeout",
            Self::InvalidShard => "InvalidShard",
            Self::ShardingRequired => "ShardingRequired",
            Self::InvalidApiVersion => "InvalidApiVersion",
            Self::InvalidIntents => "InvalidIntents",
            Self::DisallowedIntents => "DisallowedIntents",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.name(),
            self.as_u16(),
            self.description()
        )
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(4000), Some(CloseCode::UnknownError));
        assert_eq!(
            CloseCode::from_u16(4004),
            Some(CloseCode::AuthenticationFailed)
        );
        assert_eq!(CloseCode::from_u16(4014), Some(CloseCode::DisallowedIntents));
        assert_eq!(CloseCode::from_u16(1000), None);
        assert_eq!(CloseCode::from_u16(4006), None); // 4006 is not defined
    }

    #[test]
    fn test_resume_policy_codes() {
        for code in [4000, 4001, 4002, 4003, 4005, 4008] {
            assert_eq!(CloseCode::policy_for(code), ClosePolicy::Resume, "{code}");
        }
        // Standard range defaults to resume
        assert_eq!(CloseCode::policy_for(1000), ClosePolicy::Resume);
        assert_eq!(CloseCode::policy_for(1001), ClosePolicy::Resume);
        assert_eq!(CloseCode::policy_for(1999), ClosePolicy::Resume);
    }

    #[test]
    fn test_reidentify_policy_codes() {
        assert_eq!(CloseCode::policy_for(4007), ClosePolicy::Reidentify);
        assert_eq!(CloseCode::policy_for(4009), ClosePolicy::Reidentify);
    }

    #[test]
    fn test_fatal_policy_codes() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert_eq!(CloseCode::policy_for(code), ClosePolicy::Fatal, "{code}");
        }
    }

    #[test]
    fn test_unknown_code_is_unhandled() {
        assert_eq!(CloseCode::policy_for(4006), ClosePolicy::Unhandled);
        assert_eq!(CloseCode::policy_for(4999), ClosePolicy::Unhandled);
        assert_eq!(CloseCode::policy_for(3000), ClosePolicy::Unhandled);
    }

    #[test]
    fn test_close_code_display() {
        let code = CloseCode::AuthenticationFailed;
        let display = format!("{code}");
        assert!(display.contains("4004"));
        assert!(display.contains("Authentication"));
    }
}
