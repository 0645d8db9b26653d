//! Event dispatch - listener registry and one-shot waiters

mod dispatcher;
mod wait_for;

pub use dispatcher::{DispatchError, Event, EventDispatcher, ListenerError, ListenerId};
pub use wait_for::WaitFor;
