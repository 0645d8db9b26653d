//! Event dispatcher behavior under misbehaving listeners

use std::time::Duration;

use chat_core::events::{EventDispatcher, ListenerError};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn test_panicking_listener_does_not_starve_others() {
    let dispatcher: EventDispatcher<String> = EventDispatcher::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    dispatcher.add_listener(Some("message_create"), |_event| async {
        panic!("listener blew up");
        #[allow(unreachable_code)]
        Ok::<(), ListenerError>(())
    });
    dispatcher.add_listener(Some("message_create"), move |event| {
        let tx = tx.clone();
        async move {
            tx.send(event.data).ok();
            Ok(())
        }
    });

    dispatcher.dispatch("message_create", "payload".to_string());

    let delivered = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("surviving listener should still run")
        .expect("channel open");
    assert_eq!(delivered, "payload");

    // The dispatcher itself stays usable after the panic
    dispatcher.dispatch("message_create", "again".to_string());
    let delivered = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("dispatcher should survive a panicking listener")
        .expect("channel open");
    assert_eq!(delivered, "again");
}

#[tokio::test]
async fn test_global_listener_receives_event_names() {
    let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    dispatcher.add_listener(None, move |event| {
        let tx = tx.clone();
        async move {
            tx.send((event.name.to_string(), event.data)).ok();
            Ok(())
        }
    });

    dispatcher.dispatch("guild_create", 1);
    dispatcher.dispatch("message_create", 2);

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(
            timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("global listener should run")
                .expect("channel open"),
        );
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("guild_create".to_string(), 1),
            ("message_create".to_string(), 2)
        ]
    );
}

#[tokio::test]
async fn test_cancelled_wait_for_deregisters() {
    let dispatcher: EventDispatcher<u64> = EventDispatcher::new();

    {
        let waiter = dispatcher.wait_for(Some("message_create"), |data: &u64| *data == 7);
        assert_eq!(dispatcher.waiter_count(), 1);
        // Cancelled by racing against an already-elapsed timeout
        let raced = timeout(Duration::ZERO, waiter).await;
        assert!(raced.is_err());
    }
    assert_eq!(dispatcher.waiter_count(), 0);

    // A fresh waiter still works after the cancellation
    let waiter = dispatcher.wait_for(Some("message_create"), |data: &u64| *data == 7);
    dispatcher.dispatch("message_create", 7);
    assert_eq!(waiter.await.unwrap(), 7);
}

#[tokio::test]
async fn test_wait_for_ignores_other_events_and_failed_predicates() {
    let dispatcher: EventDispatcher<u64> = EventDispatcher::new();
    let waiter = dispatcher.wait_for(Some("typing_start"), |data: &u64| *data > 100);

    dispatcher.dispatch("typing_start", 50);
    dispatcher.dispatch("message_create", 500);
    assert_eq!(dispatcher.waiter_count(), 1);

    dispatcher.dispatch("typing_start", 500);
    assert_eq!(waiter.await.unwrap(), 500);
}
