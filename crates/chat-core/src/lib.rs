//! # chat-core
//!
//! Domain layer containing value objects and the typed event dispatcher shared
//! by the HTTP and gateway crates. This crate has no transport dependencies.

pub mod events;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use events::{DispatchError, Event, EventDispatcher, ListenerError, ListenerId, WaitFor};
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
