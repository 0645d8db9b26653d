//! Rate limit bucket registry
//!
//! One [`RatelimitStorage`] per distinct credential. Owns the buckets keyed
//! by locally computed id, a weak secondary index keyed by the server's
//! bucket hash (the authoritative grouping signal), the route-shape metadata
//! that outlives bucket rotations, and the credential's global limiter. A
//! periodic sweep task evicts buckets holding no state; a swept bucket is
//! recreated limit-unknown on next use, at the cost of one new probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::bucket::{Bucket, BucketMetadata};
use super::global::GlobalLimiter;
use crate::routes::Route;

/// Per-credential rate limit state
pub struct RatelimitStorage {
    /// Buckets by locally computed bucket id
    buckets: DashMap<String, Arc<Bucket>>,
    /// Weak index by server-reported bucket hash
    ///
    /// Non-owning so the secondary index alone never keeps a bucket alive.
    by_hash: DashMap<String, Weak<Bucket>>,
    /// Local bucket id -> server hash, recorded when a response reveals one
    links: DashMap<String, String>,
    /// Route-shape metadata, reused across bucket rotations
    metadata: DashMap<String, Arc<BucketMetadata>>,
    global: Arc<dyn GlobalLimiter>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RatelimitStorage {
    /// Create storage around a global limiter strategy
    #[must_use]
    pub fn new(global: Arc<dyn GlobalLimiter>) -> Arc<Self> {
        Arc::new(Self {
            buckets: DashMap::new(),
            by_hash: DashMap::new(),
            links: DashMap::new(),
            metadata: DashMap::new(),
            global,
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// The credential's global limiter
    #[must_use]
    pub fn global(&self) -> &Arc<dyn GlobalLimiter> {
        &self.global
    }

    /// Number of live buckets
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Resolve the bucket for a route
    ///
    /// Preference order: existing bucket by local id, then the bucket the
    /// server linked this route to by hash, then a fresh bucket seeded from
    /// route-shape metadata (cold when no metadata exists yet).
    #[must_use]
    pub fn bucket_for(&self, route: &Route) -> Arc<Bucket> {
        let bucket_id = route.bucket_id();

        if let Some(bucket) = self.buckets.get(&bucket_id) {
            return Arc::clone(&bucket);
        }

        if let Some(hash) = self.links.get(&bucket_id) {
            if let Some(shared) = self.by_hash.get(hash.value()).and_then(|weak| weak.upgrade()) {
                self.buckets.insert(bucket_id, Arc::clone(&shared));
                return shared;
            }
        }

        let metadata = self
            .metadata
            .entry(route.metadata_key())
            .or_insert_with(|| Arc::new(BucketMetadata::new(route.metadata_key())))
            .clone();

        // entry() so two racing cold lookups settle on one bucket
        let bucket = self
            .buckets
            .entry(bucket_id.clone())
            .or_insert_with(|| {
                tracing::debug!(bucket = %bucket_id, "Created rate limit bucket");
                Bucket::new(bucket_id.clone(), metadata)
            })
            .clone();
        bucket
    }

    /// Record the server-reported bucket hash for a route
    ///
    /// When the hash already maps to a different live bucket, future requests
    /// for this route are redirected there: the server's grouping is
    /// authoritative over the locally guessed one.
    pub fn link(&self, route: &Route, hash: &str, bucket: &Arc<Bucket>) {
        let bucket_id = route.bucket_id();
        self.links.insert(bucket_id.clone(), hash.to_string());

        if let Some(existing) = self.by_hash.get(hash).and_then(|weak| weak.upgrade()) {
            if !Arc::ptr_eq(&existing, bucket) {
                tracing::debug!(
                    bucket = %bucket_id,
                    hash,
                    shared_with = existing.id(),
                    "Routes share a server rate limit scope; relinking"
                );
                self.buckets.insert(bucket_id, existing);
            }
            return;
        }
        self.by_hash.insert(hash.to_string(), Arc::downgrade(bucket));
    }

    /// Start the periodic eviction task
    ///
    /// Each pass keeps only dirty buckets and prunes dead hash entries.
    /// Holds a `Weak` reference so the sweeper never keeps storage alive.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(storage) = weak.upgrade() else { return };
                if storage.closed.load(Ordering::SeqCst) {
                    return;
                }
                storage.sweep();
            }
        });
        let mut sweeper = self.sweeper.lock();
        if let Some(previous) = sweeper.replace(handle) {
            previous.abort();
        }
    }

    /// One eviction pass over the registry
    pub fn sweep(&self) {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.is_dirty());
        self.by_hash.retain(|_, weak| weak.strong_count() > 0);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            tracing::debug!(evicted, retained = self.buckets.len(), "Swept idle buckets");
        }
    }

    /// Stop the sweeper, close the global limiter and every bucket, and
    /// clear the registry
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.global.close();
        for entry in &self.buckets {
            entry.value().close();
        }
        self.buckets.clear();
        self.by_hash.clear();
        self.links.clear();
        self.metadata.clear();
        tracing::debug!("Rate limit storage closed");
    }

    /// Whether the storage has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RatelimitStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatelimitStorage")
            .field("buckets", &self.buckets.len())
            .field("hashes", &self.by_hash.len())
            .field("metadata", &self.metadata.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
