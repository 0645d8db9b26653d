//! Cross-route global rate limiter
//!
//! The protocol specifies an overall requests-per-second budget on top of the
//! per-route buckets. Every authenticated request passes through one of two
//! interchangeable strategies: [`UnlimitedGlobalLimiter`] (no fixed cap, only
//! the lockout window a global 429 opens) or [`FixedGlobalLimiter`] (a fixed
//! per-second admission count with a priority wait queue). Routes marked
//! globally exempt bypass the limiter per request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::bucket::AcquireError;
use super::queue::TicketQueue;

/// Cross-route request throttle
#[async_trait]
pub trait GlobalLimiter: Send + Sync {
    /// Pass one request through the global budget
    async fn acquire(&self, priority: u32, wait: bool) -> Result<(), AcquireError>;

    /// Open a lockout window after a server-reported global breach
    fn update(&self, retry_after: Duration);

    /// Fail queued waiters and refuse further admissions
    fn close(&self);
}

/// Lockout window shared by both strategies
#[derive(Default)]
struct Lockout {
    until: Mutex<Option<Instant>>,
}

impl Lockout {
    /// Deadline of the active lockout, if one is open
    fn deadline(&self) -> Option<Instant> {
        let mut until = self.until.lock();
        match *until {
            Some(deadline) if deadline > Instant::now() => Some(deadline),
            Some(_) => {
                *until = None;
                None
            }
            None => None,
        }
    }

    fn open(&self, retry_after: Duration) {
        let deadline = Instant::now() + retry_after;
        let mut until = self.until.lock();
        // Never shorten an already-open window
        if until.is_none_or(|existing| existing < deadline) {
            *until = Some(deadline);
        }
    }
}

/// Global limiter without a fixed cap
///
/// Requests pass straight through unless a global 429 opened a lockout
/// window; blocked callers proceed unordered once it elapses.
#[derive(Default)]
pub struct UnlimitedGlobalLimiter {
    lockout: Lockout,
    closed: AtomicBool,
}

impl UnlimitedGlobalLimiter {
    /// Create a pass-through global limiter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GlobalLimiter for UnlimitedGlobalLimiter {
    async fn acquire(&self, _priority: u32, wait: bool) -> Result<(), AcquireError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(AcquireError::Closed);
            }
            let Some(deadline) = self.lockout.deadline() else {
                return Ok(());
            };
            if !wait {
                return Err(AcquireError::RateLimited);
            }
            tokio::time::sleep_until(deadline).await;
        }
    }

    fn update(&self, retry_after: Duration) {
        tracing::warn!(
            retry_after_ms = retry_after.as_millis(),
            "Global rate limit hit; locking all requests"
        );
        self.lockout.open(retry_after);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Length of the fixed admission window
const FIXED_WINDOW: Duration = Duration::from_secs(1);

struct FixedState {
    /// Admissions consumed in the current one-second window
    admitted: u32,
    /// When the current window opened
    window_start: Instant,
    queue: TicketQueue,
    /// The reset tick task is running
    ticking: bool,
}

impl FixedState {
    /// Refill the window when its second has elapsed
    fn refill_if_elapsed(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= FIXED_WINDOW {
            self.admitted = 0;
            self.window_start = now;
        }
    }
}

struct FixedInner {
    limit: u32,
    state: Mutex<FixedState>,
    lockout: Lockout,
    closed: AtomicBool,
}

/// Global limiter with a fixed per-second admission count
///
/// Functionally parallel to a bucket's known-limit path, minus the per-route
/// metadata: a one-second window, a priority wait queue, and a recurring
/// reset tick that refills the window and drains the queue. Cheap to clone;
/// clones share the same window.
#[derive(Clone)]
pub struct FixedGlobalLimiter {
    inner: Arc<FixedInner>,
}

enum Step {
    Admit,
    Wait(u64, tokio::sync::oneshot::Receiver<()>),
}

impl FixedGlobalLimiter {
    /// Create a limiter admitting `limit` requests per second
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            inner: Arc::new(FixedInner {
                limit: limit.max(1),
                state: Mutex::new(FixedState {
                    admitted: 0,
                    window_start: Instant::now(),
                    queue: TicketQueue::new(),
                    ticking: false,
                }),
                lockout: Lockout::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of queued waiters
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Reset tick: refill the window, grant queued tickets in priority
    /// order, exit once the queue drains. Idle windows refill lazily in
    /// `acquire` instead, so this task only runs while waiters are parked.
    async fn tick_cycle(weak: Weak<FixedInner>) {
        loop {
            tokio::time::sleep(FIXED_WINDOW).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            if inner.lockout.deadline().is_some() {
                // Window stays shut while a global lockout is open
                continue;
            }
            let mut state = inner.state.lock();
            state.admitted = 0;
            state.window_start = Instant::now();
            while state.admitted < inner.limit && state.queue.grant_one() {
                state.admitted += 1;
            }
            if state.queue.is_empty() {
                state.ticking = false;
                return;
            }
        }
    }
}

#[async_trait]
impl GlobalLimiter for FixedGlobalLimiter {
    async fn acquire(&self, priority: u32, wait: bool) -> Result<(), AcquireError> {
        let inner = &self.inner;
        loop {
            if inner.closed.load(Ordering::SeqCst) {
                return Err(AcquireError::Closed);
            }
            if let Some(deadline) = inner.lockout.deadline() {
                if !wait {
                    return Err(AcquireError::RateLimited);
                }
                tokio::time::sleep_until(deadline).await;
                continue;
            }

            let step = {
                let mut state = inner.state.lock();
                state.refill_if_elapsed();
                // Newcomers go behind existing waiters even when the window
                // has room, keeping the priority/FIFO order honest
                if state.admitted < inner.limit && state.queue.is_empty() {
                    state.admitted += 1;
                    Step::Admit
                } else if wait {
                    let (id, rx) = state.queue.push(priority);
                    if !state.ticking {
                        state.ticking = true;
                        tokio::spawn(Self::tick_cycle(Arc::downgrade(inner)));
                    }
                    Step::Wait(id, rx)
                } else {
                    return Err(AcquireError::RateLimited);
                }
            };

            match step {
                Step::Admit => return Ok(()),
                Step::Wait(id, rx) => {
                    let mut pending = PendingGlobalTicket {
                        inner: Arc::clone(inner),
                        id,
                        armed: true,
                    };
                    return match rx.await {
                        Ok(()) => {
                            pending.armed = false;
                            Ok(())
                        }
                        Err(_) => {
                            pending.armed = false;
                            Err(AcquireError::Closed)
                        }
                    };
                }
            }
        }
    }

    fn update(&self, retry_after: Duration) {
        tracing::warn!(
            retry_after_ms = retry_after.as_millis(),
            "Global rate limit hit; locking all requests"
        );
        self.inner.lockout.open(retry_after);
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.state.lock().queue.clear();
    }
}

/// Removes a queued global ticket when its waiter is cancelled
struct PendingGlobalTicket {
    inner: Arc<FixedInner>,
    id: u64,
    armed: bool,
}

impl Drop for PendingGlobalTicket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.lock();
        if !state.queue.remove(self.id) {
            // The grant raced the cancellation; pass the counted slot on, or
            // return it to the window when nobody is waiting
            if !state.queue.grant_one() {
                state.admitted = state.admitted.saturating_sub(1);
            }
        }
    }
}
