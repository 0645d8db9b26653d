//! Priority ticket queue
//!
//! Waiters queue as tickets ordered by priority (lower served first), FIFO
//! within a priority class. A ticket is granted by completing its oneshot
//! sender; cancelled waiters remove themselves by ticket id.

use tokio::sync::oneshot;

/// A queued waiter
struct Ticket {
    id: u64,
    priority: u32,
    tx: oneshot::Sender<()>,
}

/// Priority/FIFO queue of waiting request tickets
#[derive(Default)]
pub struct TicketQueue {
    entries: Vec<Ticket>,
    next_id: u64,
}

impl TicketQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tickets
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tickets are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue a ticket, returning its id and the grant receiver
    ///
    /// Inserted after every ticket with priority less than or equal to its
    /// own, so equal priorities stay FIFO.
    pub fn push(&mut self, priority: u32) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        let position = self
            .entries
            .iter()
            .position(|ticket| ticket.priority > priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, Ticket { id, priority, tx });
        (id, rx)
    }

    /// Remove a ticket by id; returns whether it was still queued
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|ticket| ticket.id != id);
        self.entries.len() != before
    }

    /// Grant the frontmost ticket whose waiter is still listening
    ///
    /// Tickets whose receiver was dropped are discarded on the way. Returns
    /// whether a grant was delivered.
    pub fn grant_one(&mut self) -> bool {
        while !self.entries.is_empty() {
            let ticket = self.entries.remove(0);
            if ticket.tx.send(()).is_ok() {
                return true;
            }
        }
        false
    }

    /// Drop every queued ticket
    ///
    /// Their receivers resolve with a channel-closed error.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for TicketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketQueue")
            .field("len", &self.entries.len())
            .finish()
    }
}
