//! Gateway intents bitflags
//!
//! Selects which event groups the gateway delivers to a session. Sent in the
//! identify payload as a 64-bit integer bitfield.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Gateway event-group subscription flags
    ///
    /// Privileged groups must be enabled for the application server-side
    /// before a session may request them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// Guild create/update/delete and role/channel lifecycle
        const GUILDS                   = 1 << 0;
        /// Member join/update/leave (privileged)
        const GUILD_MEMBERS            = 1 << 1;
        /// Messages sent in guild channels
        const GUILD_MESSAGES           = 1 << 2;
        /// Reactions on guild messages
        const GUILD_MESSAGE_REACTIONS  = 1 << 3;
        /// Typing indicators in guild channels
        const GUILD_MESSAGE_TYPING     = 1 << 4;
        /// Presence updates (privileged)
        const GUILD_PRESENCES          = 1 << 5;
        /// Voice state updates in guild channels
        const GUILD_VOICE_STATES       = 1 << 6;
        /// Messages sent in direct-message channels
        const DIRECT_MESSAGES          = 1 << 7;
        /// Reactions on direct messages
        const DIRECT_MESSAGE_REACTIONS = 1 << 8;
        /// Message content fields on dispatched messages (privileged)
        const MESSAGE_CONTENT          = 1 << 9;

        /// Privileged groups requiring server-side enablement
        const PRIVILEGED = Self::GUILD_MEMBERS.bits()
            | Self::GUILD_PRESENCES.bits()
            | Self::MESSAGE_CONTENT.bits();

        /// Every unprivileged group
        const UNPRIVILEGED = Self::GUILDS.bits()
            | Self::GUILD_MESSAGES.bits()
            | Self::GUILD_MESSAGE_REACTIONS.bits()
            | Self::GUILD_MESSAGE_TYPING.bits()
            | Self::GUILD_VOICE_STATES.bits()
            | Self::DIRECT_MESSAGES.bits()
            | Self::DIRECT_MESSAGE_REACTIONS.bits();

        /// Every defined group
        const ALL = Self::PRIVILEGED.bits() | Self::UNPRIVILEGED.bits();
    }
}

impl Intents {
    /// Check whether any privileged group is requested
    #[inline]
    pub fn is_privileged(&self) -> bool {
        self.intersects(Intents::PRIVILEGED)
    }

    /// The privileged subset of this mask
    #[inline]
    pub fn privileged(&self) -> Intents {
        *self & Intents::PRIVILEGED
    }

    /// Parse from string representation (decimal number)
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        s.parse::<u64>().map(Intents::from_bits_truncate)
    }

    /// Get a list of all individual groups that are set
    pub fn list(&self) -> Vec<&'static str> {
        let mut result = Vec::new();
        if self.contains(Self::GUILDS) {
            result.push("GUILDS");
        }
        if self.contains(Self::GUILD_MEMBERS) {
            result.push("GUILD_MEMBERS");
        }
        if self.contains(Self::GUILD_MESSAGES) {
            result.push("GUILD_MESSAGES");
        }
        if self.contains(Self::GUILD_MESSAGE_REACTIONS) {
            result.push("GUILD_MESSAGE_REACTIONS");
        }
        if self.contains(Self::GUILD_MESSAGE_TYPING) {
            result.push("GUILD_MESSAGE_TYPING");
        }
        if self.contains(Self::GUILD_PRESENCES) {
            result.push("GUILD_PRESENCES");
        }
        if self.contains(Self::GUILD_VOICE_STATES) {
            result.push("GUILD_VOICE_STATES");
        }
        if self.contains(Self::DIRECT_MESSAGES) {
            result.push("DIRECT_MESSAGES");
        }
        if self.contains(Self::DIRECT_MESSAGE_REACTIONS) {
            result.push("DIRECT_MESSAGE_REACTIONS");
        }
        if self.contains(Self::MESSAGE_CONTENT) {
            result.push("MESSAGE_CONTENT");
        }
        result
    }
}

impl Default for Intents {
    fn default() -> Self {
        Intents::UNPRIVILEGED
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

// Serialize as a plain integer; identify payloads expect a number
impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

// Deserialize from string or number
impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct IntentsVisitor;

        impl Visitor<'_> for IntentsVisitor {
            type Value = Intents;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer representing intent bits")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Intents, E>
            where
                E: de::Error,
            {
                Ok(Intents::from_bits_truncate(value as u64))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Intents, E>
            where
                E: de::Error,
            {
                Ok(Intents::from_bits_truncate(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Intents, E>
            where
                E: de::Error,
            {
                value
                    .parse::<u64>()
                    .map(Intents::from_bits_truncate)
                    .map_err(|_| de::Error::custom("invalid intents string"))
            }
        }

        deserializer.deserialize_any(IntentsVisitor)
    }
}

impl From<u64> for Intents {
    fn from(bits: u64) -> Self {
        Intents::from_bits_truncate(bits)
    }
}

impl From<Intents> for u64 {
    fn from(intents: Intents) -> Self {
        intents.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unprivileged() {
        let default = Intents::default();
        assert!(default.contains(Intents::GUILDS));
        assert!(default.contains(Intents::GUILD_MESSAGES));
        assert!(default.contains(Intents::DIRECT_MESSAGES));
        assert!(!default.is_privileged());
    }

    #[test]
    fn test_privileged_detection() {
        let intents = Intents::GUILDS | Intents::GUILD_PRESENCES;
        assert!(intents.is_privileged());
        assert_eq!(intents.privileged(), Intents::GUILD_PRESENCES);

        let unprivileged = Intents::GUILDS | Intents::GUILD_MESSAGES;
        assert!(!unprivileged.is_privileged());
    }

    #[test]
    fn test_serialize_as_number() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
        let json = serde_json::to_string(&intents).unwrap();
        assert_eq!(json, "5"); // 1 + 4
    }

    #[test]
    fn test_deserialize_number() {
        let intents: Intents = serde_json::from_str("5").unwrap();
        assert!(intents.contains(Intents::GUILDS));
        assert!(intents.contains(Intents::GUILD_MESSAGES));
    }

    #[test]
    fn test_deserialize_string() {
        let intents: Intents = serde_json::from_str("\"5\"").unwrap();
        assert!(intents.contains(Intents::GUILDS));
        assert!(intents.contains(Intents::GUILD_MESSAGES));
    }

    #[test]
    fn test_parse() {
        let intents = Intents::parse("3").unwrap();
        assert!(intents.contains(Intents::GUILDS));
        assert!(intents.contains(Intents::GUILD_MEMBERS));
        assert!(Intents::parse("nope").is_err());
    }

    #[test]
    fn test_list_groups() {
        let intents = Intents::GUILDS | Intents::MESSAGE_CONTENT;
        let list = intents.list();
        assert!(list.contains(&"GUILDS"));
        assert!(list.contains(&"MESSAGE_CONTENT"));
        assert!(!list.contains(&"GUILD_PRESENCES"));
    }

    #[test]
    fn test_all_covers_every_group() {
        assert_eq!(
            Intents::ALL,
            Intents::PRIVILEGED | Intents::UNPRIVILEGED
        );
        assert_eq!(Intents::ALL.list().len(), 10);
    }
}
