//! Typed event dispatcher
//!
//! Listener registry with one-shot waiters, shared by the HTTP and gateway
//! clients. Named listeners receive only their event; global listeners
//! receive everything along with the event name. Listener failures route to
//! error handlers and never escape a dispatch.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::wait_for::WaitFor;

/// Error type a listener may surface
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from dispatcher bookkeeping operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The handle does not refer to a registered listener
    #[error("listener {0} is not registered")]
    NotRegistered(ListenerId),
    /// The dispatcher has been closed
    #[error("event dispatcher is closed")]
    Closed,
}

/// Handle identifying a registered listener or error handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dispatched event: the name it was raised under plus its payload
#[derive(Debug, Clone)]
pub struct Event<E> {
    /// Event name (dispatch type, opcode name, response label)
    pub name: Arc<str>,
    /// Event payload
    pub data: E,
}

type ListenerFn<E> =
    Arc<dyn Fn(Event<E>) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;
type ErrorHandlerFn<E> = Arc<dyn Fn(&Event<E>, &ListenerError) + Send + Sync>;
type PredicateFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

struct ListenerEntry<E> {
    id: u64,
    event: Option<Arc<str>>,
    callback: ListenerFn<E>,
}

struct ErrorHandlerEntry<E> {
    id: u64,
    event: Option<Arc<str>>,
    callback: ErrorHandlerFn<E>,
}

pub(super) struct WaiterEntry<E> {
    pub(super) id: u64,
    event: Option<Arc<str>>,
    predicate: PredicateFn<E>,
    tx: oneshot::Sender<E>,
}

pub(super) struct DispatcherState<E> {
    listeners: Vec<ListenerEntry<E>>,
    error_handlers: Vec<ErrorHandlerEntry<E>>,
    pub(super) waiters: Vec<WaiterEntry<E>>,
}

pub(super) struct Shared<E> {
    pub(super) state: Mutex<DispatcherState<E>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<E> Shared<E> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn handle_listener_error(&self, event: &Event<E>, error: &ListenerError) {
        let handlers: Vec<ErrorHandlerFn<E>> = {
            let state = self.state.lock();
            state
                .error_handlers
                .iter()
                .filter(|entry| name_matches(entry.event.as_deref(), &event.name))
                .map(|entry| Arc::clone(&entry.callback))
                .collect()
        };

        if handlers.is_empty() {
            tracing::warn!(
                event = %event.name,
                error = %error,
                "Listener failed with no error handler registered"
            );
            return;
        }

        for handler in handlers {
            handler(event, error);
        }
    }
}

fn name_matches(filter: Option<&str>, name: &str) -> bool {
    filter.is_none_or(|f| f == name)
}

/// Typed event dispatcher
///
/// Cheap to clone; clones share the same listener tables.
pub struct EventDispatcher<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventDispatcher<E> {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DispatcherState {
                    listeners: Vec::new(),
                    error_handlers: Vec::new(),
                    waiters: Vec::new(),
                }),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Check whether the dispatcher has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.state.lock().listeners.len()
    }

    /// Number of outstanding waiters
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Remove a listener by its handle
    pub fn remove_listener(&self, id: ListenerId) -> Result<(), DispatchError> {
        let mut state = self.shared.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|entry| entry.id != id.0);
        if state.listeners.len() == before {
            return Err(DispatchError::NotRegistered(id));
        }
        Ok(())
    }

    /// Remove an error handler by its handle
    pub fn remove_error_handler(&self, id: ListenerId) -> Result<(), DispatchError> {
        let mut state = self.shared.state.lock();
        let before = state.error_handlers.len();
        state.error_handlers.retain(|entry| entry.id != id.0);
        if state.error_handlers.len() == before {
            return Err(DispatchError::NotRegistered(id));
        }
        Ok(())
    }

    /// Close the dispatcher
    ///
    /// Clears every listener and error handler, fails outstanding waiters
    /// with [`DispatchError::Closed`], and turns later dispatches into
    /// no-ops.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.state.lock();
        state.listeners.clear();
        state.error_handlers.clear();
        // Dropping the senders wakes the waiters with a closed error
        state.waiters.clear();
        tracing::debug!("Event dispatcher closed");
    }
}

impl<E: Clone + Send + Sync + 'static> EventDispatcher<E> {
    /// Register a listener
    ///
    /// `event = None` registers a global listener invoked for every event;
    /// otherwise the listener only sees dispatches under that name. Each
    /// invocation runs in its own task.
    pub fn add_listener<F, Fut>(&self, event: Option<&str>, listener: F) -> ListenerId
    where
        F: Fn(Event<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let id = self.shared.next_id();
        if self.is_closed() {
            tracing::trace!(listener_id = id, "Listener registered on closed dispatcher");
            return ListenerId(id);
        }
        let callback: ListenerFn<E> = Arc::new(move |ev| Box::pin(listener(ev)));
        self.shared.state.lock().listeners.push(ListenerEntry {
            id,
            event: event.map(Arc::from),
            callback,
        });
        ListenerId(id)
    }

    /// Register an error handler
    ///
    /// Receives the event that made a listener fail together with the error.
    /// `event = None` handles failures from every event.
    pub fn add_error_handler<F>(&self, event: Option<&str>, handler: F) -> ListenerId
    where
        F: Fn(&Event<E>, &ListenerError) + Send + Sync + 'static,
    {
        let id = self.shared.next_id();
        if self.is_closed() {
            return ListenerId(id);
        }
        self.shared
            .state
            .lock()
            .error_handlers
            .push(ErrorHandlerEntry {
                id,
                event: event.map(Arc::from),
                callback: Arc::new(handler),
            });
        ListenerId(id)
    }

    /// Wait for the first event whose payload satisfies the predicate
    ///
    /// Predicates run under the dispatcher lock and must be fast and
    /// non-blocking. Dropping the returned future deregisters the waiter.
    pub fn wait_for<P>(&self, event: Option<&str>, predicate: P) -> WaitFor<E>
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let id = self.shared.next_id();
        let (tx, rx) = oneshot::channel();
        if self.is_closed() {
            // tx drops here so the future resolves with Closed right away
            return WaitFor::new(Arc::clone(&self.shared), id, rx);
        }
        self.shared.state.lock().waiters.push(WaiterEntry {
            id,
            event: event.map(Arc::from),
            predicate: Arc::new(predicate),
            tx,
        });
        WaitFor::new(Arc::clone(&self.shared), id, rx)
    }

    /// Dispatch an event to matching listeners and waiters
    ///
    /// Listener invocations are spawned; their errors route to error handlers
    /// and never propagate to the caller. Returns the number of notified
    /// parties.
    pub fn dispatch(&self, name: &str, data: E) -> usize {
        if self.is_closed() {
            tracing::trace!(event = name, "Dispatch on closed dispatcher ignored");
            return 0;
        }
        let name: Arc<str> = Arc::from(name);

        let (callbacks, grants) = {
            let mut state = self.shared.state.lock();
            let callbacks: Vec<ListenerFn<E>> = state
                .listeners
                .iter()
                .filter(|entry| name_matches(entry.event.as_deref(), &name))
                .map(|entry| Arc::clone(&entry.callback))
                .collect();

            let mut grants = Vec::new();
            let mut index = 0;
            while index < state.waiters.len() {
                let entry = &state.waiters[index];
                if name_matches(entry.event.as_deref(), &name) && (entry.predicate)(&data) {
                    grants.push(state.waiters.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            (callbacks, grants)
        };

        let mut notified = 0;
        for waiter in grants {
            if waiter.tx.send(data.clone()).is_ok() {
                notified += 1;
            } else {
                tracing::trace!(event = %name, "Waiter cancelled before completion");
            }
        }

        notified += callbacks.len();
        for callback in callbacks {
            let event = Event {
                name: Arc::clone(&name),
                data: data.clone(),
            };
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(error) = callback(event.clone()).await {
                    shared.handle_listener_error(&event, &error);
                }
            });
        }
        notified
    }
}

impl<E> fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("EventDispatcher")
            .field("listeners", &state.listeners.len())
            .field("error_handlers", &state.error_handlers.len())
            .field("waiters", &state.waiters.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_named_listener_receives_matching_event() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.add_listener(Some("message_create"), move |event: Event<u64>| {
            let tx = tx.clone();
            async move {
                tx.send((event.name.to_string(), event.data)).ok();
                Ok(())
            }
        });

        assert_eq!(dispatcher.dispatch("message_create", 7), 1);
        assert_eq!(dispatcher.dispatch("typing_start", 9), 0);

        let (name, data) = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("listener should have run")
            .expect("channel open");
        assert_eq!(name, "message_create");
        assert_eq!(data, 7);
    }

    #[tokio::test]
    async fn test_global_listener_sees_every_event() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.add_listener(None, move |event: Event<u64>| {
            let tx = tx.clone();
            async move {
                tx.send(event.name.to_string()).ok();
                Ok(())
            }
        });

        dispatcher.dispatch("message_create", 1);
        dispatcher.dispatch("typing_start", 2);

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(
                timeout(Duration::from_secs(1), rx.recv())
                    .await
                    .expect("listener should have run")
                    .expect("channel open"),
            );
        }
        seen.sort();
        assert_eq!(seen, vec!["message_create", "typing_start"]);
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let id = dispatcher.add_listener(Some("typing_start"), |_event| async {
            Ok::<(), ListenerError>(())
        });
        assert_eq!(dispatcher.listener_count(), 1);

        dispatcher.remove_listener(id).unwrap();
        assert_eq!(dispatcher.listener_count(), 0);
        assert!(matches!(
            dispatcher.remove_listener(id),
            Err(DispatchError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_listener_error_routes_to_error_handler() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.add_listener(Some("presence_update"), |_event| async {
            Err::<(), ListenerError>("boom".into())
        });
        dispatcher.add_error_handler(Some("presence_update"), move |event, error| {
            tx.send(format!("{}:{error}", event.name)).ok();
        });

        dispatcher.dispatch("presence_update", 1);

        let seen = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("error handler should have run")
            .expect("channel open");
        assert_eq!(seen, "presence_update:boom");
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.add_listener(Some("guild_create"), |_event| async {
            Err::<(), ListenerError>("bad listener".into())
        });
        dispatcher.add_listener(Some("guild_create"), move |event: Event<u64>| {
            let tx = tx.clone();
            async move {
                tx.send(event.data).ok();
                Ok(())
            }
        });
        let waiter = dispatcher.wait_for(Some("guild_create"), |data: &u64| *data == 42);

        dispatcher.dispatch("guild_create", 42);

        let delivered = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("second listener should have run");
        assert_eq!(delivered, Some(42));
        let resolved = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
        assert_eq!(resolved, 42);
    }

    #[tokio::test]
    async fn test_wait_for_skips_non_matching_dispatches() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let waiter = dispatcher.wait_for(Some("message_create"), |data: &u64| *data > 10);

        dispatcher.dispatch("message_create", 5);
        dispatcher.dispatch("typing_start", 50);
        assert_eq!(dispatcher.waiter_count(), 1);

        dispatcher.dispatch("message_create", 50);
        assert_eq!(waiter.await.unwrap(), 50);
        assert_eq!(dispatcher.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_no_residue() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let waiter = dispatcher.wait_for(Some("message_create"), |_: &u64| true);
        assert_eq!(dispatcher.waiter_count(), 1);

        drop(waiter);
        assert_eq!(dispatcher.waiter_count(), 0);
        assert_eq!(dispatcher.dispatch("message_create", 1), 0);
    }

    #[tokio::test]
    async fn test_close_fails_pending_waiters() {
        let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
        let waiter = dispatcher.wait_for(None, |_: &u64| true);
        dispatcher.add_listener(None, |_event| async { Ok::<(), ListenerError>(()) });

        dispatcher.close();

        assert!(matches!(waiter.await, Err(DispatchError::Closed)));
        assert_eq!(dispatcher.listener_count(), 0);
        assert_eq!(dispatcher.dispatch("anything", 1), 0);
        assert!(dispatcher.is_closed());
    }
}
