//! Per-route rate limit bucket
//!
//! A [`Bucket`] admits at most the server-confirmed number of concurrent
//! requests into one rate limit scope. While the scope's quota is unknown a
//! single "blind" probe request goes out alone to discover it from the
//! response headers; everyone else waits for the probe. Once known, admission
//! is `remaining - reserved` with the overflow queued in priority order.
//!
//! Admission hands back an RAII [`Admission`] guard. Completing it with the
//! server's authoritative numbers drives the reset cycle; dropping it
//! un-updated returns the slot and frees exactly one queued ticket, on the
//! assumption that a failed request's slot is available again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::queue::TicketQueue;

/// Errors from bucket or global limiter admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// Quota exhausted and the caller opted out of waiting
    #[error("Rate limit exhausted and waiting was not requested")]
    RateLimited,
    /// The bucket or limiter was closed while waiting
    #[error("Rate limiter closed")]
    Closed,
}

/// Longer-lived scope info keyed by route shape
///
/// Survives rotations of the concrete [`Bucket`]: the server may migrate a
/// route to a different bucket hash while the limit stays stable, and an idle
/// bucket swept from the registry leaves its metadata behind to seed the
/// replacement.
#[derive(Debug)]
pub struct BucketMetadata {
    key: String,
    state: Mutex<MetadataState>,
}

#[derive(Debug, Default)]
struct MetadataState {
    limit: Option<u64>,
    unlimited: bool,
}

impl BucketMetadata {
    /// Create metadata for a route shape with everything unknown
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(MetadataState::default()),
        }
    }

    /// The route shape this metadata describes
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Known per-window call limit, if discovered
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.state.lock().limit
    }

    /// Whether the route turned out to carry no rate limit
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.state.lock().unlimited
    }

    /// Record the server-reported limit
    pub fn set_limit(&self, limit: u64) {
        let mut state = self.state.lock();
        state.limit = Some(limit);
        state.unlimited = false;
    }

    /// Mark the route as carrying no rate limit
    pub fn set_unlimited(&self) {
        let mut state = self.state.lock();
        state.unlimited = true;
        state.limit = None;
    }
}

struct BucketState {
    /// Server-reported calls left in the window; None until discovered
    remaining: Option<u64>,
    /// In-flight requests admitted against the window
    reserved: u64,
    /// Waiters blocked on an exhausted window
    queue: TicketQueue,
    /// A reset task is scheduled or running
    resetting: bool,
    /// Window length from the last authoritative update
    reset_after: Duration,
}

/// One server-recognized rate limit scope
pub struct Bucket {
    id: String,
    metadata: Arc<BucketMetadata>,
    state: Mutex<BucketState>,
    /// Single-flight guard for the blind discovery probe
    probe: Arc<Semaphore>,
    closed: AtomicBool,
}

enum Step {
    Admit,
    Wait(u64, oneshot::Receiver<()>),
    Probe,
}

impl Bucket {
    /// Create a bucket for a locally computed bucket id
    ///
    /// When the metadata already knows the limit, the bucket starts with a
    /// full window; the first response corrects the estimate.
    #[must_use]
    pub fn new(id: impl Into<String>, metadata: Arc<BucketMetadata>) -> Arc<Self> {
        let remaining = metadata.limit();
        Arc::new(Self {
            id: id.into(),
            metadata,
            state: Mutex::new(BucketState {
                remaining,
                reserved: 0,
                queue: TicketQueue::new(),
                resetting: false,
                reset_after: Duration::ZERO,
            }),
            probe: Arc::new(Semaphore::new(1)),
            closed: AtomicBool::new(false),
        })
    }

    /// The locally computed bucket id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared route-shape metadata
    #[must_use]
    pub fn metadata(&self) -> &Arc<BucketMetadata> {
        &self.metadata
    }

    /// In-flight reservation count
    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.state.lock().reserved
    }

    /// Number of queued waiters
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Server-reported remaining count, if known
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        self.state.lock().remaining
    }

    /// Whether the bucket holds state worth keeping
    ///
    /// Clean buckets are swept from the registry; a swept bucket is simply
    /// recreated (limit unknown again) on next use.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        if self.metadata.is_unlimited() {
            return false;
        }
        let state = self.state.lock();
        if state.reserved > 0 || !state.queue.is_empty() || state.resetting {
            return true;
        }
        match (state.remaining, self.metadata.limit()) {
            (Some(remaining), Some(limit)) => remaining < limit,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Admit one request into the scope
    ///
    /// Admission order: unlimited routes pass untouched; a known window
    /// admits while `remaining - reserved > 0` and queues the rest by
    /// priority (FIFO within a class); an unknown window sends one probe and
    /// parks everyone else behind it. With `wait = false` any path that
    /// would suspend fails with [`AcquireError::RateLimited`] instead.
    pub async fn acquire(
        self: &Arc<Self>,
        priority: u32,
        wait: bool,
    ) -> Result<Admission, AcquireError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(AcquireError::Closed);
            }
            if self.metadata.is_unlimited() {
                return Ok(Admission::unlimited(Arc::clone(self)));
            }

            let step = {
                let mut state = self.state.lock();
                match state.remaining {
                    Some(remaining) => {
                        let estimated = remaining.saturating_sub(state.reserved);
                        if estimated > 0 {
                            state.reserved += 1;
                            Step::Admit
                        } else if wait {
                            let (id, rx) = state.queue.push(priority);
                            Step::Wait(id, rx)
                        } else {
                            return Err(AcquireError::RateLimited);
                        }
                    }
                    None => Step::Probe,
                }
            };

            match step {
                Step::Admit => return Ok(Admission::reserved(Arc::clone(self), None)),
                Step::Wait(id, rx) => {
                    let mut pending = PendingTicket {
                        bucket: Arc::clone(self),
                        id,
                        armed: true,
                    };
                    return match rx.await {
                        Ok(()) => {
                            pending.armed = false;
                            Ok(Admission::reserved(Arc::clone(self), None))
                        }
                        // Sender dropped without a grant: the bucket closed
                        Err(_) => {
                            pending.armed = false;
                            Err(AcquireError::Closed)
                        }
                    };
                }
                Step::Probe => match Arc::clone(&self.probe).try_acquire_owned() {
                    Ok(permit) => {
                        // The window may have become known while racing for
                        // the permit; if so this is no longer a probe.
                        let mut state = self.state.lock();
                        if state.remaining.is_some() || self.metadata.is_unlimited() {
                            drop(state);
                            drop(permit);
                            continue;
                        }
                        state.reserved += 1;
                        drop(state);
                        tracing::debug!(bucket = %self.id, "Sending blind probe request");
                        return Ok(Admission::reserved(Arc::clone(self), Some(permit)));
                    }
                    Err(_) => {
                        if !wait {
                            return Err(AcquireError::RateLimited);
                        }
                        // Park behind the in-flight probe, then re-evaluate
                        // from the top with whatever it discovered.
                        match Arc::clone(&self.probe).acquire_owned().await {
                            Ok(permit) => drop(permit),
                            Err(_) => return Err(AcquireError::Closed),
                        }
                    }
                },
            }
        }
    }

    /// Fail every queued waiter and refuse further admissions
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.probe.close();
        let mut state = self.state.lock();
        // Dropping the grant senders fails the waiters with Closed
        state.queue.clear();
        tracing::debug!(bucket = %self.id, "Bucket closed");
    }

    fn spawn_reset(self: &Arc<Self>, delay: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(Self::reset_cycle(weak, delay));
    }

    /// Restore the window to the metadata limit and release up to `limit`
    /// queued tickets; reschedules itself while waiters remain
    async fn reset_cycle(weak: Weak<Bucket>, mut delay: Duration) {
        loop {
            tokio::time::sleep(delay).await;
            let Some(bucket) = weak.upgrade() else { return };
            if bucket.closed.load(Ordering::SeqCst) {
                return;
            }
            let mut state = bucket.state.lock();
            let limit = bucket.metadata.limit().unwrap_or(1);
            state.remaining = Some(limit);
            let mut granted = 0;
            while granted < limit && state.queue.grant_one() {
                state.reserved += 1;
                granted += 1;
            }
            tracing::trace!(bucket = %bucket.id, granted, "Bucket window reset");
            if state.queue.is_empty() {
                state.resetting = false;
                return;
            }
            delay = state.reset_after;
        }
    }

    fn release_one(&self) {
        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(1);
        if state.queue.grant_one() {
            state.reserved += 1;
        }
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Bucket")
            .field("id", &self.id)
            .field("remaining", &state.remaining)
            .field("reserved", &state.reserved)
            .field("queued", &state.queue.len())
            .field("resetting", &state.resetting)
            .finish()
    }
}

/// Removes a queued ticket when its waiter is cancelled
struct PendingTicket {
    bucket: Arc<Bucket>,
    id: u64,
    armed: bool,
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.bucket.state.lock();
        if !state.queue.remove(self.id) {
            // A grant raced the cancellation; hand the slot to the next waiter
            state.reserved = state.reserved.saturating_sub(1);
            if state.queue.grant_one() {
                state.reserved += 1;
            }
        }
    }
}

/// RAII admission into a bucket
///
/// Must be completed with [`Admission::update`] or
/// [`Admission::update_unlimited`] using the response's authoritative
/// numbers. Dropping it un-updated releases the reservation and frees exactly
/// one queued ticket.
pub struct Admission {
    bucket: Arc<Bucket>,
    probe: Option<OwnedSemaphorePermit>,
    unlimited: bool,
    completed: bool,
}

impl Admission {
    fn reserved(bucket: Arc<Bucket>, probe: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            bucket,
            probe,
            unlimited: false,
            completed: false,
        }
    }

    fn unlimited(bucket: Arc<Bucket>) -> Self {
        Self {
            bucket,
            probe: None,
            unlimited: true,
            completed: true,
        }
    }

    /// Whether this admission was the scope's blind probe
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// Feed back the server's authoritative remaining count and window
    ///
    /// Schedules the reset timer that restores the window and drains the
    /// queue. Releasing a held probe permit (on drop here) wakes the
    /// requests parked behind the probe to re-evaluate.
    pub fn update(mut self, remaining: u64, reset_after: Duration) {
        self.completed = true;
        if self.unlimited {
            return;
        }
        let mut state = self.bucket.state.lock();
        state.reserved = state.reserved.saturating_sub(1);
        state.remaining = Some(remaining);
        state.reset_after = reset_after;
        if !state.resetting {
            state.resetting = true;
            drop(state);
            self.bucket.spawn_reset(reset_after);
        }
    }

    /// Record that the route carries no rate limit headers at all
    ///
    /// Marks the metadata unlimited and releases every queued waiter.
    pub fn update_unlimited(mut self) {
        self.completed = true;
        if self.unlimited {
            return;
        }
        self.bucket.metadata.set_unlimited();
        let mut state = self.bucket.state.lock();
        state.reserved = state.reserved.saturating_sub(1);
        state.remaining = None;
        while state.queue.grant_one() {
            state.reserved += 1;
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if self.probe.is_some() {
            // Degraded mode: the probe learned nothing. The permit release
            // below wakes the parked requests so the scope is not starved.
            tracing::warn!(
                bucket = %self.bucket.id,
                "Probe request finished without a quota update"
            );
        }
        self.bucket.release_one();
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("bucket", &self.bucket.id)
            .field("probe", &self.probe.is_some())
            .field("unlimited", &self.unlimited)
            .finish()
    }
}
