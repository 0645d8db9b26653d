//! Gateway send-rate limiting
//!
//! Two independent limits apply to outbound traffic: the per-shard command
//! budget (120 sends per 60 seconds, with slots reserved for heartbeats) and
//! the IDENTIFY limiter shared across all shards (one identify per 5 seconds
//! per concurrency key).

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Fixed send budget per 60-second window
pub const COMMANDS_PER_WINDOW: u32 = 120;

/// Length of the command budget window
pub const COMMAND_WINDOW: Duration = Duration::from_secs(60);

/// Minimum spacing between identifies sharing a concurrency key
pub const IDENTIFY_DELAY: Duration = Duration::from_secs(5);

/// Per-shard outbound command budget
///
/// A fixed window of 120 sends per 60 seconds. Once Hello arrives the
/// capacity shrinks to reserve slots for heartbeats, which use the internal
/// send path and never draw from this budget.
#[derive(Debug)]
pub struct CommandBudget {
    state: parking_lot::Mutex<BudgetState>,
}

#[derive(Debug)]
struct BudgetState {
    capacity: u32,
    remaining: u32,
    window_start: Instant,
}

impl CommandBudget {
    /// Create a budget at full capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(BudgetState {
                capacity: COMMANDS_PER_WINDOW,
                remaining: COMMANDS_PER_WINDOW,
                window_start: Instant::now(),
            }),
        }
    }

    /// Shrink the capacity to reserve heartbeat slots
    ///
    /// The reservation is sized from the server-given heartbeat interval in
    /// seconds. Current remaining slots are clamped to the new capacity.
    pub fn reserve_heartbeats(&self, interval_secs: u64) {
        let reserved = (interval_secs.div_ceil(60) as u32).max(1);
        let capacity = COMMANDS_PER_WINDOW.saturating_sub(reserved).max(1);

        let mut state = self.state.lock();
        state.capacity = capacity;
        state.remaining = state.remaining.min(capacity);
    }

    /// Take one slot, or report how long until the window resets
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let elapsed = now.duration_since(state.window_start);
        if elapsed >= COMMAND_WINDOW {
            state.window_start = now;
            state.remaining = state.capacity;
        }

        if state.remaining > 0 {
            state.remaining -= 1;
            Ok(())
        } else {
            Err(COMMAND_WINDOW - now.duration_since(state.window_start))
        }
    }

    /// Wait for a free slot, then take it
    pub async fn acquire(&self) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(retry_after) => tokio::time::sleep(retry_after).await,
            }
        }
    }

    /// Slots left in the current window
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.state.lock().remaining
    }
}

impl Default for CommandBudget {
    fn default() -> Self {
        Self::new()
    }
}

/// IDENTIFY rate limiter shared across shards
///
/// The protocol allows one identify per 5 seconds per concurrency key, where
/// a shard's key is `shard_id % max_concurrency`. A permit is consumed at
/// acquisition and never refunded, even when the identify later times out;
/// the per-key window recovers on its own.
#[derive(Debug)]
pub struct IdentifyLimiter {
    slots: Vec<Mutex<Option<Instant>>>,
}

impl IdentifyLimiter {
    /// Create a limiter for the given concurrency
    #[must_use]
    pub fn new(max_concurrency: u32) -> Self {
        let keys = max_concurrency.max(1) as usize;
        Self {
            slots: (0..keys).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Number of concurrency keys
    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Wait for this shard's concurrency key, consuming one permit
    pub async fn acquire(&self, shard_id: u32) {
        let key = shard_id as usize % self.slots.len();
        let mut slot = self.slots[key].lock().await;

        if let Some(next_at) = *slot {
            if next_at > Instant::now() {
                tokio::time::sleep_until(next_at).await;
            }
        }
        *slot = Some(Instant::now() + IDENTIFY_DELAY);
    }
}
