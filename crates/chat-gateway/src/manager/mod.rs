//! Shard set orchestration
//!
//! The [`ShardManager`] owns the live shard set, the IDENTIFY limiter shared
//! across shards, and live rescaling. Shard events fan in onto the manager's
//! dispatchers so consumers subscribe in one place regardless of shard
//! count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chat_common::{ClientConfig, RetryPolicy};
use chat_core::EventDispatcher;
use chat_http::{GatewayBotInfo, HttpClient, HttpError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ShardError};
use crate::events::{CriticalEvent, DispatchEvent};
use crate::limiter::IdentifyLimiter;
use crate::protocol::GatewayMessage;
use crate::shard::{Shard, ShardConfig};

/// Orchestrates the shard set
///
/// Cheap to clone; clones share the same manager state.
#[derive(Clone)]
pub struct ShardManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ClientConfig,
    http: Arc<HttpClient>,
    retry: RetryPolicy,
    // A pinned count means the caller chose it; invalid-shard-count criticals
    // then propagate instead of triggering an auto-rescale
    pinned: bool,

    shards: Mutex<Vec<Arc<Shard>>>,
    pending: Mutex<Vec<Arc<Shard>>>,
    identify_limiter: Mutex<Option<Arc<IdentifyLimiter>>>,
    gateway_url: Mutex<Option<String>>,

    rescaling: AtomicBool,
    closed: AtomicBool,

    raw: EventDispatcher<GatewayMessage>,
    events: EventDispatcher<DispatchEvent>,
    critical: EventDispatcher<CriticalEvent>,
}

/// Closes the pending set and releases the rescale flag on any exit path,
/// including cancellation mid-rescale
struct RescaleGuard<'a>(&'a ManagerInner);

impl Drop for RescaleGuard<'_> {
    fn drop(&mut self) {
        let leftover: Vec<Arc<Shard>> = self.0.pending.lock().drain(..).collect();
        for shard in leftover {
            shard.close();
        }
        self.0.rescaling.store(false, Ordering::SeqCst);
    }
}

impl ShardManager {
    /// Create a manager around an existing HTTP client
    #[must_use]
    pub fn new(config: ClientConfig, http: Arc<HttpClient>) -> Self {
        let pinned = config.gateway.shard_count.is_some();
        Self {
            inner: Arc::new(ManagerInner {
                config,
                http,
                retry: RetryPolicy::gateway_default(),
                pinned,
                shards: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                identify_limiter: Mutex::new(None),
                gateway_url: Mutex::new(None),
                rescaling: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                raw: EventDispatcher::new(),
                events: EventDispatcher::new(),
                critical: EventDispatcher::new(),
            }),
        }
    }

    /// Create a manager and its HTTP client from the client configuration
    pub fn from_config(config: ClientConfig) -> Result<Self, ManagerError> {
        let http = Arc::new(HttpClient::from_config(&config)?);
        Ok(Self::new(config, http))
    }

    /// Raw gateway messages from every shard, keyed by opcode name
    #[must_use]
    pub fn raw_events(&self) -> &EventDispatcher<GatewayMessage> {
        &self.inner.raw
    }

    /// Named dispatch events from every shard
    #[must_use]
    pub fn events(&self) -> &EventDispatcher<DispatchEvent> {
        &self.inner.events
    }

    /// Critical conditions the manager did not absorb
    #[must_use]
    pub fn critical_events(&self) -> &EventDispatcher<CriticalEvent> {
        &self.inner.critical
    }

    /// Number of active shards
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.inner.shards.lock().len()
    }

    /// Number of shards being built by an in-flight rescale
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Snapshot of the active shard set
    #[must_use]
    pub fn shards(&self) -> Vec<Arc<Shard>> {
        self.inner.shards.lock().clone()
    }

    /// Start the shard set
    ///
    /// Fetches the recommended shard count and identify concurrency, spawns
    /// one shard per configured or recommended id, and schedules each
    /// shard's `connect()` as a background task. Returns once all shards are
    /// spawned, not once they are ready.
    pub async fn connect(&self) -> Result<(), ManagerError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ManagerError::Closed);
        }

        let info = inner.fetch_gateway_info().await?;
        let count = inner.config.gateway.shard_count.unwrap_or(info.shards);
        let ids = match inner.config.gateway.shard_ids.clone() {
            Some(ids) => ids,
            None => (0..count).collect(),
        };
        validate_shard_ids(count, &ids)?;

        let limiter = Arc::new(IdentifyLimiter::new(info.session_start_limit.max_concurrency));
        *inner.identify_limiter.lock() = Some(Arc::clone(&limiter));
        let url = inner
            .config
            .gateway
            .url
            .clone()
            .unwrap_or_else(|| info.url.clone());
        *inner.gateway_url.lock() = Some(url.clone());

        info!(
            shard_count = count,
            shard_ids = ?ids,
            max_concurrency = info.session_start_limit.max_concurrency,
            "Starting shard set"
        );

        let shards: Vec<Arc<Shard>> = ids
            .iter()
            .map(|&id| inner.build_shard(id, count, &url, &limiter))
            .collect();
        *inner.shards.lock() = shards.clone();

        for shard in shards {
            tokio::spawn(async move {
                match shard.connect().await {
                    Ok(()) | Err(ShardError::AlreadyConnecting(_) | ShardError::Closed) => {}
                    Err(err) => {
                        warn!(shard_id = shard.shard_id(), error = %err, "Shard start failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Replace the shard set with one at a new count
    ///
    /// Builds a parallel pending set, connects every pending shard, and only
    /// swaps on full success; the old set keeps serving until then and is
    /// closed after the swap. Cancellation closes the pending set and leaves
    /// the active set untouched. Mutually exclusive with itself.
    pub async fn rescale_shards(
        &self,
        new_count: u32,
        ids: Option<Vec<u32>>,
    ) -> Result<(), ManagerError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ManagerError::Closed);
        }
        let ids = match ids {
            Some(ids) => ids,
            None => (0..new_count).collect(),
        };
        validate_shard_ids(new_count, &ids)?;

        if inner
            .rescaling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ManagerError::RescaleInProgress);
        }
        let _guard = RescaleGuard(inner);

        let (limiter, url) = inner.limiter_and_url().await?;

        info!(new_count, shard_ids = ?ids, "Rescaling shard set");
        let pending: Vec<Arc<Shard>> = ids
            .iter()
            .map(|&id| inner.build_shard(id, new_count, &url, &limiter))
            .collect();
        *inner.pending.lock() = pending.clone();

        let connects = pending.iter().map(|shard| {
            let shard = Arc::clone(shard);
            async move {
                shard.connect().await.map_err(|source| {
                    ManagerError::ShardStart {
                        shard_id: shard.shard_id(),
                        source,
                    }
                })
            }
        });
        futures::future::try_join_all(connects).await?;

        // Full success: swap first, close the replaced set after
        let new_set: Vec<Arc<Shard>> = inner.pending.lock().drain(..).collect();
        let old_set = std::mem::replace(&mut *inner.shards.lock(), new_set);
        for shard in old_set {
            shard.close();
        }
        info!(new_count, "Rescale complete");
        Ok(())
    }

    /// Close the manager and every shard
    pub fn close(&self) {
        self.inner.close();
    }
}

impl ManagerInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let active: Vec<Arc<Shard>> = self.shards.lock().drain(..).collect();
        for shard in active {
            shard.close();
        }
        let pending: Vec<Arc<Shard>> = self.pending.lock().drain(..).collect();
        for shard in pending {
            shard.close();
        }
        self.raw.close();
        self.events.close();
        self.critical.close();
        info!("Shard manager closed");
    }

    /// Fetch `/gateway/bot`, retrying transport failures with gateway backoff
    async fn fetch_gateway_info(&self) -> Result<GatewayBotInfo, ManagerError> {
        let mut attempt = 0u32;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ManagerError::Closed);
            }
            match self.http.get_gateway_bot().await {
                Ok(info) => return Ok(info),
                Err(HttpError::Transport(err)) => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(error = %err, attempt, ?delay, "Gateway info fetch failed, backing off");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(ManagerError::Http(err)),
            }
        }
    }

    /// Identify limiter and gateway URL, fetching them if never connected
    async fn limiter_and_url(&self) -> Result<(Arc<IdentifyLimiter>, String), ManagerError> {
        let cached = {
            let limiter = self.identify_limiter.lock().clone();
            let url = self.gateway_url.lock().clone();
            limiter.zip(url)
        };
        if let Some(found) = cached {
            return Ok(found);
        }

        let info = self.fetch_gateway_info().await?;
        let limiter = Arc::new(IdentifyLimiter::new(info.session_start_limit.max_concurrency));
        *self.identify_limiter.lock() = Some(Arc::clone(&limiter));
        let url = self.config.gateway.url.clone().unwrap_or(info.url);
        *self.gateway_url.lock() = Some(url.clone());
        Ok((limiter, url))
    }

    fn build_shard(
        self: &Arc<Self>,
        shard_id: u32,
        shard_count: u32,
        url: &str,
        limiter: &Arc<IdentifyLimiter>,
    ) -> Arc<Shard> {
        let config =
            ShardConfig::from_client(&self.config, shard_id, shard_count, url.to_string());
        let shard = Shard::new(config, Arc::clone(limiter));
        self.wire_shard(&shard);
        shard
    }

    /// Re-emit one shard's dispatches on the manager's dispatchers
    fn wire_shard(self: &Arc<Self>, shard: &Arc<Shard>) {
        let raw = self.raw.clone();
        shard.raw_events().add_listener(None, move |event| {
            let raw = raw.clone();
            async move {
                raw.dispatch(&event.name, event.data);
                Ok(())
            }
        });

        let events = self.events.clone();
        shard.events().add_listener(None, move |event| {
            let events = events.clone();
            async move {
                events.dispatch(&event.name, event.data);
                Ok(())
            }
        });

        // Weak so a closed manager is not kept alive by its shards
        let weak: Weak<Self> = Arc::downgrade(self);
        shard.critical_events().add_listener(None, move |event| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_critical(event.data).await;
                }
                Ok(())
            }
        });
    }

    async fn on_critical(self: &Arc<Self>, event: CriticalEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if let CriticalEvent::InvalidShardCount { shard_id } = event {
            if !self.pinned {
                if self.rescaling.load(Ordering::SeqCst) {
                    debug!(shard_id, "Rescale already in flight, ignoring shard count rejection");
                    return;
                }
                info!(shard_id, "Shard count rejected, rescaling to recommendation");
                let manager = ShardManager {
                    inner: Arc::clone(self),
                };
                match self.fetch_gateway_info().await {
                    Ok(info) => {
                        if let Err(err) = manager.rescale_shards(info.shards, None).await {
                            warn!(error = %err, "Automatic rescale failed");
                            self.critical.dispatch(event.name(), event);
                            self.close();
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Could not fetch recommended shard count");
                        self.critical.dispatch(event.name(), event);
                        self.close();
                    }
                }
                return;
            }
        }

        // Everything else is beyond repair at this layer
        self.critical.dispatch(event.name(), event);
        self.close();
    }
}

fn validate_shard_ids(count: u32, ids: &[u32]) -> Result<(), ManagerError> {
    if count == 0 {
        return Err(ManagerError::InvalidConfig(
            "shard count must be at least 1".to_string(),
        ));
    }
    if ids.is_empty() {
        return Err(ManagerError::InvalidConfig(
            "shard id list is empty".to_string(),
        ));
    }
    if let Some(&bad) = ids.iter().find(|&&id| id >= count) {
        return Err(ManagerError::InvalidConfig(format!(
            "shard id {bad} is out of range for count {count}"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shards", &self.shard_count())
            .field("pending", &self.pending_count())
            .field("rescaling", &self.inner.rescaling.load(Ordering::SeqCst))
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}
