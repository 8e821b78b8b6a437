//! End-to-end lifecycle tests against the loopback transport

use std::sync::Arc;
use std::time::Duration;

use oxidesub::transport::LoopbackTransport;
use oxidesub::{
    ConnectionState, ManagerConfig, ManagerEvent, PubSubError, PubSubManager, TransportEvent,
};

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn manager_with(transport: &LoopbackTransport, max_attempts: u32) -> PubSubManager {
    let mut config = ManagerConfig::default();
    config.reconnect.max_attempts = max_attempts;
    PubSubManager::new(Arc::new(transport.clone()), config).unwrap()
}

async fn connected(transport: &LoopbackTransport, max_attempts: u32) -> PubSubManager {
    let manager = manager_with(transport, max_attempts);
    manager.connect("loopback://rt", Some("conn-token".into()), None).await.unwrap();
    transport.current_session().unwrap().emit(TransportEvent::Connected);
    settle().await;
    manager
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn connected_event_resets_attempts() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 10).await;

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(
        transport.current_session().unwrap().last_token().as_deref(),
        Some("conn-token")
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_event_suspends_and_schedules_first_delay() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 10).await;
    for channel in ["a", "b"] {
        manager.create_subscription(channel, None, None).await.unwrap();
    }

    transport.current_session().unwrap().emit(TransportEvent::Disconnected {
        reason: "socket closed".into(),
    });
    settle().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.is_subscription_active("a"));
    assert!(!manager.is_subscription_active("b"));
    assert!(manager.has_subscription("a"));
    assert_eq!(manager.pending_reconnect_delay(), Some(Duration::from_millis(1000)));
}

#[tokio::test(start_paused = true)]
async fn consecutive_disconnects_exhaust_attempts() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 3).await;
    let mut events = manager.events();
    let session = transport.current_session().unwrap();

    for attempt in 0..3u32 {
        session.emit(TransportEvent::Disconnected {
            reason: "reset".into(),
        });
        settle().await;

        let delay = Duration::from_millis(1000 * 2u64.pow(attempt));
        assert_eq!(manager.pending_reconnect_delay(), Some(delay));
        tokio::time::sleep(delay + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(manager.reconnect_attempts(), attempt + 1);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    session.emit(TransportEvent::Disconnected {
        reason: "reset".into(),
    });
    settle().await;
    assert_eq!(manager.pending_reconnect_delay(), None);
    assert_eq!(manager.reconnect_attempts(), 3);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ManagerEvent::ReconnectAttemptsExhausted { attempts: 3 })));

    // Nothing fires later either
    tokio::time::sleep(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(session.connect_calls(), 4);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // connect() starts over
    manager.connect("loopback://rt", None, None).await.unwrap();
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_twice_is_idempotent() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 10).await;
    manager.create_subscription("room-1", None, None).await.unwrap();
    let session = transport.current_session().unwrap();

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.get_all_subscriptions().is_empty());
    assert_eq!(manager.pending_reconnect_delay(), None);
    assert_eq!(session.disconnect_calls(), 1);
    assert_eq!(session.subscription("room-1").unwrap().unsubscribe_calls(), 1);
    assert!(matches!(
        manager.create_subscription("room-1", None, None).await,
        Err(PubSubError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn create_then_close_round_trip() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 10).await;

    manager.create_subscription("room-1", None, None).await.unwrap();
    assert!(manager.has_subscription("room-1"));
    assert_eq!(manager.subscription_stats().active, 1);

    assert!(manager.close_subscription("room-1").await.unwrap());
    assert!(!manager.has_subscription("room-1"));
    assert!(manager.get_subscription_info("room-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_all_but_failing_channel() {
    let transport = LoopbackTransport::new().with_auto_connect();
    let manager = connected(&transport, 10).await;
    let mut events = manager.events();
    for channel in ["a", "b", "c"] {
        manager.create_subscription(channel, None, None).await.unwrap();
    }

    let session = transport.current_session().unwrap();
    session.emit(TransportEvent::Disconnected {
        reason: "server restart".into(),
    });
    settle().await;
    assert_eq!(manager.subscription_stats().inactive, 3);

    transport.fail_subscribe("b");
    tokio::time::sleep(Duration::from_millis(1001)).await;
    settle().await;

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.is_subscription_active("a"));
    assert!(!manager.is_subscription_active("b"));
    assert!(manager.is_subscription_active("c"));
    assert!(manager.has_subscription("b"));

    let restored = drain(&mut events).into_iter().find_map(|e| match e {
        ManagerEvent::SubscriptionsRestored { failed, .. } => Some(failed),
        _ => None,
    });
    assert_eq!(restored, Some(vec!["b".to_string()]));

    // Manual repair once the channel accepts subscribes again
    transport.clear_failures();
    assert!(manager.resubscribe("b").await.unwrap());
    assert!(manager.is_subscription_active("b"));
}

#[tokio::test(start_paused = true)]
async fn failed_retries_do_not_lose_restore_intent() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 10).await;
    for channel in ["a", "b"] {
        manager.create_subscription(channel, None, None).await.unwrap();
    }
    let session = transport.current_session().unwrap();

    // First drop, then a retry that fails with another drop
    for delay_ms in [1000u64, 2000] {
        session.emit(TransportEvent::Disconnected {
            reason: "reset".into(),
        });
        settle().await;
        tokio::time::sleep(Duration::from_millis(delay_ms + 1)).await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }
    assert_eq!(manager.reconnect_attempts(), 2);
    assert_eq!(manager.subscription_stats().active, 0);

    session.emit(TransportEvent::Connected);
    settle().await;

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.is_subscription_active("a"));
    assert!(manager.is_subscription_active("b"));
    assert_eq!(manager.subscription_stats().inactive, 0);
}

#[tokio::test]
async fn cleanup_closes_only_old_quiet_entries() {
    let transport = LoopbackTransport::new();
    let manager = manager_with(&transport, 10);
    manager.connect("loopback://rt", None, None).await.unwrap();
    manager.handle_transport_event(TransportEvent::Connected).await;

    let max_age = Duration::from_millis(100);
    manager.create_subscription("old", None, None).await.unwrap();
    std::thread::sleep(max_age * 2);
    manager.create_subscription("young", None, None).await.unwrap();

    let closed = manager.cleanup_inactive(max_age).await.unwrap();
    assert_eq!(closed, vec!["old".to_string()]);
    assert!(manager.has_subscription("young"));
}

#[tokio::test(start_paused = true)]
async fn publications_reach_subscription_handle() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 10).await;
    let mut handle = manager.create_subscription("room-1", None, None).await.unwrap();

    transport.current_session().unwrap().publish("room-1", "hello");
    settle().await;

    let publication = handle.recv().await.unwrap();
    assert_eq!(&publication.payload[..], b"hello");
    assert!(manager
        .get_subscription_info("room-1")
        .unwrap()
        .last_activity
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn health_monitor_reports_silent_drops() {
    let transport = LoopbackTransport::new();
    let manager = connected(&transport, 10).await;
    manager.create_subscription("a", None, None).await.unwrap();
    manager.create_subscription("b", None, None).await.unwrap();

    let session = transport.current_session().unwrap();
    session
        .subscription("b")
        .unwrap()
        .set_state(oxidesub::SubscriptionState::Unsubscribed);

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    let report = manager.last_health_report().unwrap();
    assert_eq!(report.healthy, 1);
    assert_eq!(report.unhealthy_channels, vec!["b".to_string()]);

    // Observational only
    assert!(manager.is_subscription_active("b"));
}
