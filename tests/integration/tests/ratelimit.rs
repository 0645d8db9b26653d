//! Rate limit coordination under a paused clock

use std::sync::Arc;
use std::time::Duration;

use chat_core::Snowflake;
use chat_http::{Bucket, BucketMetadata, FixedGlobalLimiter, GlobalLimiter, Route};
use parking_lot::Mutex;
use tokio::time::Instant;

fn known_bucket(limit: u64) -> Arc<Bucket> {
    let metadata = Arc::new(BucketMetadata::new("GET:/channels/{channel_id}"));
    metadata.set_limit(limit);
    Bucket::new("GET:/channels/{channel_id}:c1", metadata)
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_window_paces_three_requests() {
    let bucket = known_bucket(1);

    let start = Instant::now();
    for _ in 0..3 {
        let admission = bucket.acquire(0, true).await.unwrap();
        // Server reports the slot spent with a 100ms window
        admission.update(0, Duration::from_millis(100));
    }
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_route_never_suspends() {
    let metadata = Arc::new(BucketMetadata::new("POST:/webhooks/{webhook_id}"));
    metadata.set_unlimited();
    let bucket = Bucket::new("POST:/webhooks/{webhook_id}:w1", metadata);

    let start = Instant::now();
    for _ in 0..50 {
        let admission = bucket.acquire(0, true).await.unwrap();
        drop(admission);
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(bucket.reserved(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reserved_never_exceeds_confirmed_quota() {
    let metadata = Arc::new(BucketMetadata::new("POST:/channels/{channel_id}/messages"));
    let bucket = Bucket::new(
        "POST:/channels/{channel_id}/messages:c1",
        Arc::clone(&metadata),
    );
    // Discover the window: the blind probe comes back with 3 remaining
    let probe = bucket.acquire(0, true).await.unwrap();
    assert!(probe.is_probe());
    metadata.set_limit(3);
    probe.update(3, Duration::from_secs(10));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for _ in 0..6 {
        let bucket = Arc::clone(&bucket);
        let tx = tx.clone();
        tokio::spawn(async move {
            let admission = bucket.acquire(0, true).await.unwrap();
            tx.send(admission).ok();
        });
    }
    drop(tx);
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(bucket.reserved(), 3);
    assert_eq!(bucket.queue_len(), 3);

    // Dropping an admission un-updated releases its slot to the next waiter
    let first = rx.recv().await.unwrap();
    drop(first);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(bucket.reserved(), 3);
    assert_eq!(bucket.queue_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_leaves_the_queue() {
    let bucket = known_bucket(1);
    let first = bucket.acquire(0, true).await.unwrap();
    first.update(0, Duration::from_secs(60));

    let handle = {
        let bucket = Arc::clone(&bucket);
        tokio::spawn(async move {
            let _admission = bucket.acquire(0, true).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(bucket.queue_len(), 1);

    handle.abort();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(bucket.queue_len(), 0);
    assert_eq!(bucket.reserved(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_global_limiter_windows_admissions() {
    let limiter = Arc::new(FixedGlobalLimiter::new(2));
    let elapsed: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = Arc::clone(&limiter);
        let elapsed = Arc::clone(&elapsed);
        handles.push(tokio::spawn(async move {
            limiter.acquire(0, true).await.unwrap();
            elapsed.lock().push(start.elapsed());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut timings = elapsed.lock().clone();
    timings.sort();
    assert_eq!(
        timings,
        vec![
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(1),
        ]
    );
}

#[test]
fn test_bucket_id_equality_matrix() {
    let same_channel_a = Route::get_channel(Snowflake::new(100));
    let same_channel_b = Route::get_channel(Snowflake::new(100));
    let other_channel = Route::get_channel(Snowflake::new(200));

    // Same shape + same major parameter = same bucket
    assert_eq!(same_channel_a.bucket_id(), same_channel_b.bucket_id());
    // Same shape, different major parameter = different bucket
    assert_ne!(same_channel_a.bucket_id(), other_channel.bucket_id());
    // Metadata is keyed by shape alone and survives the major split
    assert_eq!(same_channel_a.metadata_key(), other_channel.metadata_key());

    // Different operations on the same channel stay separate
    let create = Route::create_message(Snowflake::new(100));
    assert_ne!(same_channel_a.bucket_id(), create.bucket_id());
    assert_ne!(same_channel_a.metadata_key(), create.metadata_key());
}
