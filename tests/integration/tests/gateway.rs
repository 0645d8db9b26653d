//! Shard and manager behavior against a scripted gateway

use std::sync::Arc;
use std::time::Duration;

use chat_common::ClientConfig;
use chat_core::Intents;
use chat_gateway::events::CriticalEvent;
use chat_gateway::limiter::IdentifyLimiter;
use chat_gateway::shard::{Shard, ShardConfig, ShardPhase};
use chat_gateway::ShardManager;
use integration_tests::helpers::{MockApi, MockGateway};
use serde_json::json;
use tokio::time::timeout;

async fn wait_for_phase(shard: &Arc<Shard>, phase: ShardPhase) {
    let mut watch = shard.phase_watch();
    timeout(Duration::from_secs(5), watch.wait_for(|p| *p == phase))
        .await
        .expect("phase change in time")
        .expect("phase channel alive");
}

fn test_shard(url: &str) -> Arc<Shard> {
    let config = ShardConfig::new(0, 1, url, "bot-token", Intents::GUILDS);
    Shard::new(config, Arc::new(IdentifyLimiter::new(1)))
}

#[tokio::test]
async fn test_connect_identify_ready() {
    let gateway = MockGateway::start(|_, mut conn| async move {
        conn.send_hello(45_000).await.ok();
        let identify = conn.expect_op(2).await.expect("client should identify");
        assert_eq!(identify["d"]["token"], "bot-token");
        assert_eq!(identify["d"]["shard"], json!([0, 1]));
        conn.send_ready("sess-1", 1).await.ok();
        conn.hold_open().await;
    })
    .await
    .unwrap();

    let shard = test_shard(gateway.url());
    let ready_waiter = shard.events().wait_for(Some("READY"), |_| true);

    shard.connect().await.unwrap();
    wait_for_phase(&shard, ShardPhase::Ready).await;

    let ready = timeout(Duration::from_secs(5), ready_waiter)
        .await
        .expect("READY dispatched")
        .unwrap();
    assert_eq!(ready.shard_id, 0);
    assert_eq!(ready.sequence, Some(1));

    let session = shard.session();
    assert_eq!(session.id.as_deref(), Some("sess-1"));
    assert_eq!(session.sequence, 1);

    shard.close();
}

#[tokio::test]
async fn test_intent_rejections_are_critical_and_final() {
    for (code, expected) in [
        (4013u16, CriticalEvent::InvalidIntents { shard_id: 0 }),
        (4014u16, CriticalEvent::DisallowedIntents { shard_id: 0 }),
    ] {
        let gateway = MockGateway::start(move |index, mut conn| async move {
            if index == 0 {
                conn.send_hello(45_000).await.ok();
                conn.expect_op(2).await.ok();
                conn.close_with(code).await.ok();
            } else {
                // A reconnect here would be a bug; keep the socket to count it
                conn.hold_open().await;
            }
        })
        .await
        .unwrap();

        let shard = test_shard(gateway.url());
        let critical_waiter = shard.critical_events().wait_for(None, |_| true);

        shard.connect().await.unwrap();
        let event = timeout(Duration::from_secs(5), critical_waiter)
            .await
            .expect("critical event surfaced")
            .unwrap();
        assert_eq!(event, expected);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(gateway.connection_count(), 1, "no reconnect after {code}");
        assert!(!shard.is_ready());

        shard.close();
    }
}

#[tokio::test]
async fn test_benign_close_reconnects_with_resume() {
    let gateway = MockGateway::start(|index, mut conn| async move {
        conn.send_hello(45_000).await.ok();
        if index == 0 {
            conn.expect_op(2).await.ok();
            conn.send_ready("sess-A", 5).await.ok();
            conn.close_with(4000).await.ok();
        } else {
            let resume = conn.expect_op(6).await.expect("client should resume");
            // Echo the resume payload back so the test can inspect it
            conn.send_dispatch("RESUMED", 6, resume["d"].clone())
                .await
                .ok();
            conn.hold_open().await;
        }
    })
    .await
    .unwrap();

    let shard = test_shard(gateway.url());
    let resumed_waiter = shard.events().wait_for(Some("RESUMED"), |_| true);

    shard.connect().await.unwrap();
    wait_for_phase(&shard, ShardPhase::Ready).await;

    let resumed = timeout(Duration::from_secs(5), resumed_waiter)
        .await
        .expect("session resumed after benign close")
        .unwrap();
    assert_eq!(resumed.data["session_id"], "sess-A");
    assert_eq!(resumed.data["seq"], 5);

    assert_eq!(gateway.connection_count(), 2);
    assert!(shard.is_ready());
    assert_eq!(shard.session().id.as_deref(), Some("sess-A"));

    shard.close();
}

#[tokio::test]
async fn test_cancelled_rescale_leaves_active_set_untouched() {
    let gateway = MockGateway::start(|index, mut conn| async move {
        if index == 0 {
            conn.send_hello(45_000).await.ok();
            conn.expect_op(2).await.ok();
            conn.send_ready("sess-0", 1).await.ok();
            conn.hold_open().await;
        } else {
            // Pending shards never get a Hello and stall in the handshake
            conn.hold_open().await;
        }
    })
    .await
    .unwrap();
    let api = MockApi::start(gateway.url(), 1, 1).await.unwrap();

    let config = ClientConfig::new("bot-token").with_base_url(api.base_url());
    let manager = ShardManager::from_config(config).unwrap();
    manager.connect().await.unwrap();
    assert_eq!(manager.shard_count(), 1);

    let shard = manager.shards().pop().unwrap();
    wait_for_phase(&shard, ShardPhase::Ready).await;

    // Cancel the rescale while the pending set is still waiting for Hello
    let cancelled = timeout(Duration::from_millis(500), manager.rescale_shards(2, None)).await;
    assert!(cancelled.is_err());

    assert_eq!(manager.pending_count(), 0);
    assert_eq!(manager.shard_count(), 1);
    assert!(manager.shards()[0].is_ready());

    manager.close();
}
