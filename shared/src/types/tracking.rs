use serde::{Deserialize, Serialize};
use std::fmt;

/// Order delivery status as carried on the wire and shown to customers.
///
/// Wire strings are snake_case (`"out_for_delivery"`); the storefront maps
/// them to display text via [`OrderStatus::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Processing => "Processing",
            Self::Shipped => "Shipped",
            Self::OutForDelivery => "Out for delivery",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One checkpoint in a shipment's scan history, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingCheckpoint {
    pub status: String,
    pub location: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// Live carrier-side tracking details, present once a shipment has left
/// the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTracking {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery: Option<String>,
    #[serde(default)]
    pub history: Vec<TrackingCheckpoint>,
}

/// The latest known view of one order's delivery status.
///
/// Replaced wholesale on every `tracking_update` — never merged field by
/// field. `last_updated` must be non-decreasing across replacements within
/// one client session.
///
/// Field names are camelCase on the wire; the storefront browser clients
/// consume these payloads directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTrackingState {
    pub order_id: String,
    pub order_number: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_tracking: Option<LiveTracking>,
    pub last_updated: i64,
    #[serde(default)]
    pub has_new_update: bool,
}
