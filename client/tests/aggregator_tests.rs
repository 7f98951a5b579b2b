/// Read-model tests for `MultiOrderTracker`: per-child isolation, merged
/// mappings, and the aggregate connectivity booleans.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeTransport, settle};

use client::MultiOrderTracker;
use client::notify::Notifier;
use client::session::{SessionConfig, TrackingSession};
use client::transport::StreamTransport;
use shared::types::{OrderStatus, OrderTrackingState, TrackingEvent, now_ms};

fn session_for(
    order_id: &str,
    transport: Arc<dyn StreamTransport>,
) -> (
    String,
    TrackingSession,
    tokio::sync::mpsc::UnboundedReceiver<client::session::SessionUpdate>,
) {
    let config = SessionConfig {
        reconnect_interval: Duration::from_secs(1),
        auto_reconnect: false,
        ..SessionConfig::for_order("127.0.0.1:4350", order_id)
    };
    let (session, updates) = TrackingSession::new(config, transport, Notifier::disabled());
    (order_id.to_string(), session, updates)
}

fn state_for(order_id: &str) -> OrderTrackingState {
    OrderTrackingState {
        order_id: order_id.to_string(),
        order_number: format!("#{order_id}"),
        status: OrderStatus::Processing,
        carrier: None,
        tracking_number: None,
        live_tracking: None,
        last_updated: now_ms(),
        has_new_update: false,
    }
}

#[tokio::test(start_paused = true)]
async fn empty_tracker_is_vacuously_all_connected() {
    let tracker = MultiOrderTracker::new(Vec::new());
    assert!(tracker.all_connected().await);
    assert!(!tracker.is_any_connected().await);
    assert!(tracker.states().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn mixed_connectivity_aggregates_with_or_and_and() {
    let fake_a = FakeTransport::succeeding();
    let fake_b = FakeTransport::always_failing();

    let tracker = MultiOrderTracker::new(vec![
        session_for("ord_a", fake_a.clone()),
        session_for("ord_b", fake_b.clone()),
    ]);

    tracker.start_all().await;
    settle().await;

    let connected = tracker.connected_by_order().await;
    assert_eq!(connected.get("ord_a"), Some(&true));
    assert_ne!(connected.get("ord_b"), Some(&true));

    assert!(tracker.is_any_connected().await);
    assert!(!tracker.all_connected().await);
}

#[tokio::test(start_paused = true)]
async fn child_failure_does_not_disturb_siblings() {
    let fake_a = FakeTransport::succeeding();
    let fake_b = FakeTransport::always_failing();

    let tracker = MultiOrderTracker::new(vec![
        session_for("ord_a", fake_a.clone()),
        session_for("ord_b", fake_b.clone()),
    ]);

    tracker.start_all().await;
    settle().await;

    // B failing (and staying down) never touches A's stream
    fake_a
        .emit(TrackingEvent::tracking_update(state_for("ord_a")).to_frame())
        .await;
    settle().await;

    assert_eq!(fake_a.live_streams(), 1);
    let states = tracker.states().await;
    assert!(states.contains_key("ord_a"));
    assert!(!states.contains_key("ord_b"));
}

#[tokio::test(start_paused = true)]
async fn states_merge_per_order() {
    let fake_a = FakeTransport::succeeding();
    let fake_b = FakeTransport::succeeding();

    let tracker = MultiOrderTracker::new(vec![
        session_for("ord_a", fake_a.clone()),
        session_for("ord_b", fake_b.clone()),
    ]);

    tracker.start_all().await;
    settle().await;

    fake_a
        .emit(TrackingEvent::tracking_update(state_for("ord_a")).to_frame())
        .await;
    fake_b
        .emit(TrackingEvent::tracking_update(state_for("ord_b")).to_frame())
        .await;
    settle().await;

    let states = tracker.states().await;
    assert_eq!(states.len(), 2);
    assert_eq!(states["ord_a"].order_id, "ord_a");
    assert_eq!(states["ord_b"].order_id, "ord_b");
    assert!(tracker.all_connected().await);
}

#[tokio::test(start_paused = true)]
async fn reconnect_all_retries_every_child() {
    let fake_a = FakeTransport::succeeding();
    let fake_b = FakeTransport::fail_then_succeed(1);

    let tracker = MultiOrderTracker::new(vec![
        session_for("ord_a", fake_a.clone()),
        session_for("ord_b", fake_b.clone()),
    ]);

    tracker.start_all().await;
    settle().await;
    assert!(!tracker.all_connected().await);

    tracker.reconnect_all().await;
    settle().await;

    assert_eq!(fake_a.open_count(), 2);
    assert_eq!(fake_b.open_count(), 2);
    assert!(tracker.all_connected().await);

    tracker.stop_all().await;
    settle().await;
    assert!(!tracker.is_any_connected().await);
    assert_eq!(fake_a.live_streams(), 0);
    assert_eq!(fake_b.live_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn for_orders_preserves_id_order() {
    let fake = FakeTransport::succeeding();
    let ids = vec!["ord_1".to_string(), "ord_2".to_string(), "ord_3".to_string()];
    let policy = shared::types::app_config::ClientConfig::default();

    let tracker = MultiOrderTracker::for_orders(
        "127.0.0.1:4350",
        &ids,
        &policy,
        fake.clone(),
        Notifier::disabled(),
    );

    assert_eq!(tracker.order_ids(), vec!["ord_1", "ord_2", "ord_3"]);

    tracker.start_all().await;
    settle().await;
    assert_eq!(fake.open_count(), 3);
    assert!(tracker.all_connected().await);
}
