use serde::{Deserialize, Serialize};

use crate::types::tracking::{OrderStatus, OrderTrackingState};

/// Milliseconds since the Unix epoch; the timestamp stamped on every event.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Payload of a `status_change` event.
///
/// `message` is the human-readable line surfaced in customer notifications
/// ("Your order #1042 is out for delivery").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub order_id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub message: String,
}

/// The unit of information pushed over the tracking stream.
///
/// A tagged union keyed by `type`, one payload shape per tag. The parse
/// boundary rejects bodies that do not match their tag instead of passing
/// an opaque blob through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    /// Handshake confirmation — the server is ready, not just the transport.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: i64,
    },
    /// Full replacement of the order's tracking state.
    TrackingUpdate {
        data: OrderTrackingState,
        timestamp: i64,
    },
    /// The order moved to a new status; carries the customer-facing message.
    StatusChange { data: StatusChange, timestamp: i64 },
    /// Periodic liveness signal; keeps intermediary proxies from timing
    /// the idle stream out.
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: i64,
    },
    /// Server-side failure surfaced to the client.
    Error { message: String, timestamp: i64 },
    /// Generic order update — reserved for extension; forwarded to the
    /// owner unchanged with no local handling.
    OrderUpdate {
        data: serde_json::Value,
        timestamp: i64,
    },
}

impl TrackingEvent {
    pub fn connected() -> Self {
        Self::Connected {
            message: Some("connected".to_string()),
            timestamp: now_ms(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            message: Some("heartbeat".to_string()),
            timestamp: now_ms(),
        }
    }

    pub fn tracking_update(state: OrderTrackingState) -> Self {
        Self::TrackingUpdate {
            data: state,
            timestamp: now_ms(),
        }
    }

    pub fn status_change(change: StatusChange) -> Self {
        Self::StatusChange {
            data: change,
            timestamp: now_ms(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_ms(),
        }
    }

    pub fn order_update(data: serde_json::Value) -> Self {
        Self::OrderUpdate {
            data,
            timestamp: now_ms(),
        }
    }

    /// Serialise into an SSE wire frame. The frame's event name and the
    /// body's `type` tag always agree, so clients may route on either.
    pub fn to_frame(&self) -> crate::sse::SseFrame {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        crate::sse::SseFrame::new(self.event_name(), data)
    }

    /// The `event:` line value for this event's SSE frame; equals the
    /// serde tag so the frame name and the body's `type` field agree.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::TrackingUpdate { .. } => "tracking_update",
            Self::StatusChange { .. } => "status_change",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
            Self::OrderUpdate { .. } => "order_update",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Connected { timestamp, .. }
            | Self::TrackingUpdate { timestamp, .. }
            | Self::StatusChange { timestamp, .. }
            | Self::Heartbeat { timestamp, .. }
            | Self::Error { timestamp, .. }
            | Self::OrderUpdate { timestamp, .. } => *timestamp,
        }
    }

    /// Order id used for server-side subscriber filtering, when the event
    /// carries one.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::TrackingUpdate { data, .. } => Some(&data.order_id),
            Self::StatusChange { data, .. } => Some(&data.order_id),
            Self::OrderUpdate { data, .. } => data.get("orderId").and_then(|v| v.as_str()),
            _ => None,
        }
    }

    /// Tracking number used for server-side subscriber filtering, when the
    /// event carries one.
    pub fn tracking_number(&self) -> Option<&str> {
        match self {
            Self::TrackingUpdate { data, .. } => data.tracking_number.as_deref(),
            Self::OrderUpdate { data, .. } => data.get("trackingNumber").and_then(|v| v.as_str()),
            _ => None,
        }
    }
}
