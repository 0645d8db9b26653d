//! Typed API routes
//!
//! A [`Route`] carries everything the rate limit layer needs to group
//! requests: the method, the formatted path, the path template, and the major
//! parameters. Two routes that differ only in a non-major parameter (say, a
//! message id) share a rate limit scope; differing in a major parameter
//! (guild, channel, or webhook id) separates them.

use chat_core::Snowflake;
use reqwest::Method;

/// Major path parameters participating in rate limit scope identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MajorParams {
    /// Guild id, when the route is guild-scoped
    pub guild_id: Option<Snowflake>,
    /// Channel id, when the route is channel-scoped
    pub channel_id: Option<Snowflake>,
    /// Webhook id, when the route is webhook-scoped
    pub webhook_id: Option<Snowflake>,
}

impl MajorParams {
    fn fold_into(self, out: &mut String) {
        use std::fmt::Write;
        if let Some(id) = self.guild_id {
            write!(out, ":g{id}").ok();
        }
        if let Some(id) = self.channel_id {
            write!(out, ":c{id}").ok();
        }
        if let Some(id) = self.webhook_id {
            write!(out, ":w{id}").ok();
        }
    }
}

/// A single API endpoint invocation target
#[derive(Debug, Clone)]
pub struct Route {
    /// HTTP method
    pub method: Method,
    /// Fully formatted request path
    pub path: String,
    /// Path template with parameter placeholders left in
    pub template: &'static str,
    /// Major parameters extracted from the path
    pub major: MajorParams,
    /// Whether the route bypasses the global rate limiter
    pub global_exempt: bool,
}

impl Route {
    /// Locally computed rate limit bucket id
    ///
    /// Folds the method, the template, and the major parameters. Non-major
    /// parameters are deliberately absent so those routes share a bucket.
    #[must_use]
    pub fn bucket_id(&self) -> String {
        let mut id = format!("{}:{}", self.method, self.template);
        self.major.fold_into(&mut id);
        id
    }

    /// Key for route-shape metadata shared across bucket rotations
    #[must_use]
    pub fn metadata_key(&self) -> String {
        format!("{}:{}", self.method, self.template)
    }

    // === Endpoint constructors ===

    /// GET /gateway/bot
    #[must_use]
    pub fn get_gateway_bot() -> Self {
        Self {
            method: Method::GET,
            path: "/gateway/bot".to_string(),
            template: "/gateway/bot",
            major: MajorParams::default(),
            global_exempt: false,
        }
    }

    /// GET /users/@me
    #[must_use]
    pub fn get_current_user() -> Self {
        Self {
            method: Method::GET,
            path: "/users/@me".to_string(),
            template: "/users/@me",
            major: MajorParams::default(),
            global_exempt: false,
        }
    }

    /// GET /channels/{channel_id}
    #[must_use]
    pub fn get_channel(channel_id: Snowflake) -> Self {
        Self {
            method: Method::GET,
            path: format!("/channels/{channel_id}"),
            template: "/channels/{channel_id}",
            major: MajorParams {
                channel_id: Some(channel_id),
                ..MajorParams::default()
            },
            global_exempt: false,
        }
    }

    /// POST /channels/{channel_id}/messages
    #[must_use]
    pub fn create_message(channel_id: Snowflake) -> Self {
        Self {
            method: Method::POST,
            path: format!("/channels/{channel_id}/messages"),
            template: "/channels/{channel_id}/messages",
            major: MajorParams {
                channel_id: Some(channel_id),
                ..MajorParams::default()
            },
            global_exempt: false,
        }
    }

    /// DELETE /channels/{channel_id}/messages/{message_id}
    #[must_use]
    pub fn delete_message(channel_id: Snowflake, message_id: Snowflake) -> Self {
        Self {
            method: Method::DELETE,
            path: format!("/channels/{channel_id}/messages/{message_id}"),
            template: "/channels/{channel_id}/messages/{message_id}",
            major: MajorParams {
                channel_id: Some(channel_id),
                ..MajorParams::default()
            },
            global_exempt: false,
        }
    }

    /// GET /guilds/{guild_id}
    #[must_use]
    pub fn get_guild(guild_id: Snowflake) -> Self {
        Self {
            method: Method::GET,
            path: format!("/guilds/{guild_id}"),
            template: "/guilds/{guild_id}",
            major: MajorParams {
                guild_id: Some(guild_id),
                ..MajorParams::default()
            },
            global_exempt: false,
        }
    }

    /// POST /webhooks/{webhook_id}/{token}
    #[must_use]
    pub fn execute_webhook(webhook_id: Snowflake, token: &str) -> Self {
        Self {
            method: Method::POST,
            path: format!("/webhooks/{webhook_id}/{token}"),
            template: "/webhooks/{webhook_id}/{token}",
            major: MajorParams {
                webhook_id: Some(webhook_id),
                ..MajorParams::default()
            },
            global_exempt: false,
        }
    }

    /// POST /interactions/{interaction_id}/{token}/callback
    ///
    /// Interaction callbacks are exempt from the global rate limiter.
    #[must_use]
    pub fn create_interaction_response(interaction_id: Snowflake, token: &str) -> Self {
        Self {
            method: Method::POST,
            path: format!("/interactions/{interaction_id}/{token}/callback"),
            template: "/interactions/{interaction_id}/{token}/callback",
            major: MajorParams::default(),
            global_exempt: true,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
