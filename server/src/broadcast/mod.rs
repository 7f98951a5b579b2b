mod broadcaster;

pub use broadcaster::{OrderBroadcaster, StreamFilter};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    use shared::types::{OrderStatus, OrderTrackingState, StatusChange, TrackingEvent, now_ms};

    fn filter_for_order(order_id: &str) -> StreamFilter {
        StreamFilter {
            order_id: Some(order_id.to_string()),
            tracking_number: None,
        }
    }

    fn sample_state(order_id: &str, tracking_number: Option<&str>) -> OrderTrackingState {
        OrderTrackingState {
            order_id: order_id.to_string(),
            order_number: "1042".to_string(),
            status: OrderStatus::Shipped,
            carrier: None,
            tracking_number: tracking_number.map(|s| s.to_string()),
            live_tracking: None,
            last_updated: now_ms(),
            has_new_update: false,
        }
    }

    fn status_change(order_id: &str) -> TrackingEvent {
        TrackingEvent::status_change(StatusChange {
            order_id: order_id.to_string(),
            order_number: "1042".to_string(),
            status: OrderStatus::Shipped,
            message: "Your order has shipped".to_string(),
        })
    }

    #[tokio::test]
    async fn test_register_allocates_monotonic_ids() {
        let broadcaster = OrderBroadcaster::new();
        let (tx1, _rx1) = mpsc::unbounded_channel::<Bytes>();
        let (tx2, _rx2) = mpsc::unbounded_channel::<Bytes>();
        let (tx3, _rx3) = mpsc::unbounded_channel::<Bytes>();

        let a = broadcaster.register(None, tx1).await;
        let b = broadcaster.register(Some(filter_for_order("ord_1")), tx2).await;
        let c = broadcaster.register(None, tx3).await;

        assert!(a < b && b < c);
        assert_eq!(broadcaster.subscriber_count().await, 3);
    }

    #[tokio::test]
    async fn test_unregister_unknown_id_is_noop() {
        let broadcaster = OrderBroadcaster::new();
        let (tx, _rx) = mpsc::unbounded_channel::<Bytes>();
        let id = broadcaster.register(None, tx).await;

        broadcaster.unregister(id).await;
        // Second removal of the same id, and an id never issued
        broadcaster.unregister(id).await;
        broadcaster.unregister(9999).await;

        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_isolation_from_dead_subscriber() {
        let broadcaster = OrderBroadcaster::new();

        let (tx_ok, mut rx_ok) = mpsc::unbounded_channel::<Bytes>();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel::<Bytes>();
        broadcaster.register(None, tx_ok).await;
        broadcaster.register(None, tx_dead).await;

        // Kill the second subscriber's read side; its writes now fail
        drop(rx_dead);

        let delivered = broadcaster
            .broadcast("updated", &serde_json::json!({"orderId": "ord_1"}))
            .await;

        assert_eq!(delivered, 1);
        let frame = rx_ok.recv().await.unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("event: updated\ndata: "));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_dead_subscribers_pruned_on_broadcast() {
        let broadcaster = OrderBroadcaster::new();

        let (tx_ok, _rx_ok) = mpsc::unbounded_channel::<Bytes>();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel::<Bytes>();
        broadcaster.register(None, tx_ok).await;
        broadcaster.register(None, tx_dead).await;
        drop(rx_dead);

        broadcaster.broadcast("updated", &serde_json::json!({})).await;
        assert_eq!(broadcaster.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_tracking_events_filtered_by_order_id() {
        let broadcaster = OrderBroadcaster::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel::<Bytes>();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel::<Bytes>();
        broadcaster.register(Some(filter_for_order("ord_a")), tx_a).await;
        broadcaster.register(Some(filter_for_order("ord_b")), tx_b).await;

        let delivered = broadcaster.broadcast_tracking(&status_change("ord_a")).await;

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tracking_events_matched_by_tracking_number() {
        let broadcaster = OrderBroadcaster::new();

        let filter = StreamFilter {
            order_id: None,
            tracking_number: Some("JD014600003582".to_string()),
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        broadcaster.register(Some(filter), tx).await;

        let event = TrackingEvent::tracking_update(sample_state("ord_x", Some("JD014600003582")));
        assert_eq!(broadcaster.broadcast_tracking(&event).await, 1);
        assert!(rx.try_recv().is_ok());

        // Same subscriber, different shipment: filtered out
        let other = TrackingEvent::tracking_update(sample_state("ord_y", Some("OTHER")));
        assert_eq!(broadcaster.broadcast_tracking(&other).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keyless_tracking_events_reach_all_tracking_subscribers() {
        let broadcaster = OrderBroadcaster::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel::<Bytes>();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel::<Bytes>();
        let (tx_fire, mut rx_fire) = mpsc::unbounded_channel::<Bytes>();
        broadcaster.register(Some(filter_for_order("ord_a")), tx_a).await;
        broadcaster.register(Some(filter_for_order("ord_b")), tx_b).await;
        broadcaster.register(None, tx_fire).await;

        let delivered = broadcaster
            .broadcast_tracking(&TrackingEvent::error("carrier feed degraded"))
            .await;

        // Both tracking subscribers, but never the firehose subscriber
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_fire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_firehose_and_tracking_channels_are_disjoint() {
        let broadcaster = OrderBroadcaster::new();

        let (tx_fire, mut rx_fire) = mpsc::unbounded_channel::<Bytes>();
        let (tx_track, mut rx_track) = mpsc::unbounded_channel::<Bytes>();
        broadcaster.register(None, tx_fire).await;
        broadcaster.register(Some(filter_for_order("ord_a")), tx_track).await;

        broadcaster
            .broadcast("created", &serde_json::json!({"orderId": "ord_a"}))
            .await;
        assert!(rx_fire.try_recv().is_ok());
        assert!(rx_track.try_recv().is_err());

        broadcaster.broadcast_tracking(&status_change("ord_a")).await;
        assert!(rx_track.try_recv().is_ok());
        assert!(rx_fire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frames_arrive_in_issue_order() {
        let broadcaster = OrderBroadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        broadcaster.register(Some(filter_for_order("ord_a")), tx).await;

        for status in ["confirmed", "shipped", "delivered"] {
            let payload = serde_json::json!({"status": status});
            broadcaster
                .broadcast_tracking(&TrackingEvent::order_update(
                    serde_json::json!({"orderId": "ord_a", "payload": payload}),
                ))
                .await;
        }

        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            seen.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        assert_eq!(seen.len(), 3);
        assert!(seen[0].contains("confirmed"));
        assert!(seen[1].contains("shipped"));
        assert!(seen[2].contains("delivered"));
    }

    #[test]
    fn test_filter_from_params_accepts_synonyms() {
        let mut params = HashMap::new();
        params.insert("orderId".to_string(), "ord_1".to_string());
        let filter = StreamFilter::from_params(&params).unwrap();
        assert_eq!(filter.order_id.as_deref(), Some("ord_1"));

        let mut params = HashMap::new();
        params.insert("trackingNumber".to_string(), "TN-9".to_string());
        let filter = StreamFilter::from_params(&params).unwrap();
        assert_eq!(filter.tracking_number.as_deref(), Some("TN-9"));
    }

    #[test]
    fn test_filter_from_params_requires_a_key() {
        assert!(StreamFilter::from_params(&HashMap::new()).is_none());

        // Present but empty values do not count
        let mut params = HashMap::new();
        params.insert("order_id".to_string(), String::new());
        assert!(StreamFilter::from_params(&params).is_none());
    }
}
