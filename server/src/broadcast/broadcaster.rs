use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use shared::sse::SseFrame;
use shared::types::TrackingEvent;

// ---------------------------------------------------------------------------
// Stream filter — parsed from the tracking stream's query string
// ---------------------------------------------------------------------------

/// Which order a tracking subscriber asked about.
///
/// At least one of the two keys must be present; if neither is supplied the
/// subscription handshake is rejected before any stream is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    pub order_id: Option<String>,
    pub tracking_number: Option<String>,
}

impl StreamFilter {
    /// Parse from query-string params. Accepts `orderId` and
    /// `trackingNumber` as synonyms for the snake_case names.
    pub fn from_params(params: &HashMap<String, String>) -> Option<Self> {
        let order_id = params
            .get("order_id")
            .or_else(|| params.get("orderId"))
            .filter(|s| !s.is_empty())
            .cloned();
        let tracking_number = params
            .get("tracking_number")
            .or_else(|| params.get("trackingNumber"))
            .filter(|s| !s.is_empty())
            .cloned();

        if order_id.is_none() && tracking_number.is_none() {
            return None;
        }
        Some(Self {
            order_id,
            tracking_number,
        })
    }

    /// Whether an event belongs on this subscriber's stream.
    ///
    /// Events that carry no routing key (errors, generic announcements) go
    /// to every tracking subscriber; keyed events are matched on order id
    /// or tracking number.
    pub fn matches(&self, event: &TrackingEvent) -> bool {
        let order_id = event.order_id();
        let tracking_number = event.tracking_number();

        if order_id.is_none() && tracking_number.is_none() {
            return true;
        }

        let order_match = match (self.order_id.as_deref(), order_id) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        };
        let tracking_match = match (self.tracking_number.as_deref(), tracking_number) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        };
        order_match || tracking_match
    }
}

// ---------------------------------------------------------------------------
// OrderBroadcaster
// ---------------------------------------------------------------------------

/// One live stream connection tracked by the broadcaster.
///
/// `filter: None` marks a firehose subscriber (the generic order feed);
/// `Some(filter)` marks a tracking-channel subscriber. The handle accepts
/// pre-framed wire bytes; the subscriber set owns it exclusively.
#[derive(Debug)]
struct Subscriber {
    filter: Option<StreamFilter>,
    handle: mpsc::UnboundedSender<Bytes>,
}

#[derive(Debug, Default)]
struct BroadcasterInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Fan-out hub for order events — holds the set of currently-connected
/// stream subscribers and pushes serialized frames to all of them.
///
/// Delivery is deliberately best-effort, at-most-once per subscriber: a
/// write to a closed handle is logged and swallowed, never surfaced to the
/// emitting caller, and nothing is queued across a disconnect. Frames for
/// one subscriber arrive in issue order; no ordering holds across
/// subscribers. The process holds no durable state — a restart loses all
/// subscribers and in-flight events.
#[derive(Debug, Default)]
pub struct OrderBroadcaster {
    inner: RwLock<BroadcasterInner>,
}

impl OrderBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream connection; returns its monotonically increasing
    /// subscriber id. No error conditions.
    pub async fn register(
        &self,
        filter: Option<StreamFilter>,
        handle: mpsc::UnboundedSender<Bytes>,
    ) -> u64 {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.insert(id, Subscriber { filter, handle });
        info!(
            "Subscriber {} registered ({} total)",
            id,
            inner.subscribers.len()
        );
        id
    }

    /// Remove a subscriber. Disconnects race with broadcast attempts, so an
    /// already-absent id is a no-op, not an error.
    pub async fn unregister(&self, id: u64) {
        let mut inner = self.inner.write().await;
        if inner.subscribers.remove(&id).is_some() {
            info!(
                "Subscriber {} unregistered ({} remaining)",
                id,
                inner.subscribers.len()
            );
        } else {
            debug!("Unregister for unknown subscriber {} ignored", id);
        }
    }

    /// Fan an order lifecycle event (`created` / `updated` / `deleted`) out
    /// to every firehose subscriber. Returns the delivery count.
    pub async fn broadcast(&self, event_type: &str, payload: &serde_json::Value) -> usize {
        let frame = SseFrame::new(event_type, payload.to_string());
        self.deliver(&frame, |sub| sub.filter.is_none()).await
    }

    /// Fan a typed tracking event out to every tracking subscriber whose
    /// filter matches the event's routing key. Returns the delivery count.
    pub async fn broadcast_tracking(&self, event: &TrackingEvent) -> usize {
        let frame = event.to_frame();
        let delivered = self
            .deliver(&frame, |sub| {
                sub.filter.as_ref().is_some_and(|f| f.matches(event))
            })
            .await;
        info!(
            "Broadcast {} event to {} subscribers",
            event.event_name(),
            delivered
        );
        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }

    /// Write one frame to every subscriber selected by `want`.
    ///
    /// Holds the write lock across the whole pass: sends are unbounded and
    /// never suspend, so iteration cannot interleave with a concurrent
    /// register/unregister. Dead handles are pruned first; a send that
    /// still fails (receiver dropped between prune and write) is swallowed
    /// and does not affect delivery to the other subscribers.
    async fn deliver<F>(&self, frame: &SseFrame, want: F) -> usize
    where
        F: Fn(&Subscriber) -> bool,
    {
        let bytes = frame.encode();
        let mut inner = self.inner.write().await;

        let before = inner.subscribers.len();
        inner.subscribers.retain(|_, sub| !sub.handle.is_closed());
        let pruned = before - inner.subscribers.len();
        if pruned > 0 {
            debug!("Pruned {} dead subscribers before broadcast", pruned);
        }

        let mut delivered = 0;
        for (id, sub) in inner.subscribers.iter() {
            if !want(sub) {
                continue;
            }
            match sub.handle.send(bytes.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Failed to send frame to subscriber {} (gone)", id),
            }
        }
        delivered
    }
}
