use std::convert::Infallible;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, combinators::BoxBody};
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use crate::AppState;
use crate::handlers::utils::{deliver_error_json, deliver_serialized_json, deliver_success_json};
use shared::types::stats::{ServerStats, StreamInfo};
use shared::types::{OrderTrackingState, StatusChange, TrackingEvent};

// ---------------------------------------------------------------------------
// Publish surface
//
// Order mutation itself lives with the storefront's order handlers; these
// endpoints are the ingress they call after a write commits. Everything
// here is fire-and-forget fan-out — a request succeeds even when zero
// subscribers are listening.
// ---------------------------------------------------------------------------

/// Order lifecycle tags allowed on the generic feed.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OrderLifecycle {
    Created,
    Updated,
    Deleted,
}

impl OrderLifecycle {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// POST /api/internal/orders/status request body.
///
/// The status change is mandatory; the full tracking state is attached
/// when the mutation also refreshed carrier data, and fans out as a
/// separate `tracking_update` frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPublishRequest {
    #[serde(flatten)]
    change: StatusChange,
    #[serde(default)]
    tracking: Option<OrderTrackingState>,
}

#[derive(Debug, Deserialize)]
struct EventPublishRequest {
    #[serde(rename = "type")]
    lifecycle: OrderLifecycle,
    data: serde_json::Value,
}

async fn read_json_body<T: serde::de::DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<std::result::Result<T, String>> {
    let body = req
        .collect()
        .await
        .context("Failed to read request body")?
        .to_bytes();

    Ok(serde_json::from_slice(&body).map_err(|e| e.to_string()))
}

/// POST /api/internal/orders/status — an order's status changed.
///
/// Fans a `status_change` frame (and a `tracking_update` frame when the
/// body carries refreshed tracking state) out on the tracking channel,
/// plus an `updated` frame on the generic feed.
pub async fn handle_publish_status(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let publish: StatusPublishRequest = match read_json_body(req).await? {
        Ok(p) => p,
        Err(e) => {
            warn!("Status publish rejected: {}", e);
            return deliver_error_json("INVALID_BODY", &e, StatusCode::BAD_REQUEST);
        }
    };

    info!(
        "Publishing status change: order={} status={}",
        publish.change.order_id, publish.change.status
    );

    let mut delivered = state
        .broadcaster
        .broadcast_tracking(&TrackingEvent::status_change(publish.change.clone()))
        .await;

    if let Some(tracking) = publish.tracking {
        delivered += state
            .broadcaster
            .broadcast_tracking(&TrackingEvent::tracking_update(tracking))
            .await;
    }

    let feed_payload = serde_json::to_value(&publish.change)
        .context("Failed to serialize status change for the order feed")?;
    delivered += state.broadcaster.broadcast("updated", &feed_payload).await;

    deliver_success_json(Some(serde_json::json!({ "delivered": delivered })))
}

/// POST /api/internal/orders/event — generic order lifecycle announcement
/// for the firehose feed (`created` / `updated` / `deleted`).
pub async fn handle_publish_event(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let publish: EventPublishRequest = match read_json_body(req).await? {
        Ok(p) => p,
        Err(e) => {
            warn!("Event publish rejected: {}", e);
            return deliver_error_json("INVALID_BODY", &e, StatusCode::BAD_REQUEST);
        }
    };

    let delivered = state
        .broadcaster
        .broadcast(publish.lifecycle.as_str(), &publish.data)
        .await;

    info!(
        "Published {} event to {} feed subscribers",
        publish.lifecycle.as_str(),
        delivered
    );

    deliver_success_json(Some(serde_json::json!({ "delivered": delivered })))
}

/// GET /health — liveness plus a stats snapshot for dashboards.
pub async fn handle_health(
    _req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let streams = StreamInfo {
        active_subscribers: state.broadcaster.subscriber_count().await,
        requests_total: state.metrics.requests_total(),
        errors_total: state.metrics.errors_total(),
    };

    let stats = {
        let cfg = state.config.read().await;
        ServerStats::build(&cfg, streams, state.started_at)
    };

    deliver_serialized_json(&stats, StatusCode::OK)
}
