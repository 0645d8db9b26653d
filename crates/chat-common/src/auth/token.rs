//! API credential handling
//!
//! Tokens are secrets; Debug and Display are redacted so they never leak
//! into logs.

use std::fmt;

/// Credential presented in the Authorization header
#[derive(Clone, PartialEq, Eq)]
pub enum AuthToken {
    /// Bot token, rendered as `Bot <token>`
    Bot(String),
    /// OAuth2 bearer token, rendered as `Bearer <token>`
    Bearer(String),
}

impl AuthToken {
    /// Create a bot credential, tolerating an already-prefixed token
    pub fn bot(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.trim().trim_start_matches("Bot ").to_string();
        Self::Bot(token)
    }

    /// Create a bearer credential, tolerating an already-prefixed token
    pub fn bearer(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.trim().trim_start_matches("Bearer ").to_string();
        Self::Bearer(token)
    }

    /// Render the full Authorization header value
    #[must_use]
    pub fn header_value(&self) -> String {
        match self {
            Self::Bot(token) => format!("Bot {token}"),
            Self::Bearer(token) => format!("Bearer {token}"),
        }
    }

    /// The raw secret without its prefix
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Bot(token) | Self::Bearer(token) => token,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bot(_) => "Bot",
            Self::Bearer(_) => "Bearer",
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken::{}(<redacted>)", self.kind())
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <redacted>", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_header_value() {
        let token = AuthToken::bot("abc123");
        assert_eq!(token.header_value(), "Bot abc123");
        assert_eq!(token.raw(), "abc123");
    }

    #[test]
    fn test_bearer_header_value() {
        let token = AuthToken::bearer("xyz789");
        assert_eq!(token.header_value(), "Bearer xyz789");
    }

    #[test]
    fn test_existing_prefix_stripped() {
        let token = AuthToken::bot("Bot abc123");
        assert_eq!(token.header_value(), "Bot abc123");

        let token = AuthToken::bearer("Bearer xyz789");
        assert_eq!(token.header_value(), "Bearer xyz789");
    }

    #[test]
    fn test_debug_and_display_redact() {
        let token = AuthToken::bot("super-secret");
        assert!(!format!("{token:?}").contains("super-secret"));
        assert!(!format!("{token}").contains("super-secret"));
    }
}
