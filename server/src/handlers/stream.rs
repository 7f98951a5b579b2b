use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http_body_util::{BodyExt, StreamBody, combinators::BoxBody};
use hyper::{Request, Response, StatusCode, body::Frame, header::HeaderValue};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::broadcast::{OrderBroadcaster, StreamFilter};
use crate::handlers::utils::{deliver_error_json, parse_query};
use shared::sse::SseFrame;
use shared::types::{ErrorResponse, TrackingEvent};

// ---------------------------------------------------------------------------
// Disconnect guard
// ---------------------------------------------------------------------------

/// Unregisters the subscriber when the stream body is dropped.
///
/// hyper drops the body future when the client goes away — mid-yield,
/// mid-heartbeat-wait, anywhere — so cleanup cannot live after the stream
/// loop. Each teardown step is independent: the heartbeat interval and the
/// channel receiver die with the stream, and this guard handles the
/// broadcaster entry. Unregister itself is a no-op when a racing broadcast
/// already pruned the entry.
struct StreamGuard {
    id: u64,
    broadcaster: Arc<OrderBroadcaster>,
}

impl StreamGuard {
    fn new(id: u64, broadcaster: Arc<OrderBroadcaster>) -> Self {
        Self { id, broadcaster }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let id = self.id;
        let broadcaster = Arc::clone(&self.broadcaster);
        tokio::spawn(async move {
            broadcaster.unregister(id).await;
            info!("Stream closed: subscriber={}", id);
        });
    }
}

// ---------------------------------------------------------------------------
// Stream body
// ---------------------------------------------------------------------------

/// The push loop for one open stream: greeting first, then relayed frames
/// interleaved with heartbeats on a fixed cadence.
///
/// Ends when the broadcaster drops the sender side (never, in practice) or
/// when hyper cancels the body on client disconnect.
fn frame_stream(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    greeting: Bytes,
    heartbeat: impl Fn() -> Bytes + Send + Sync + 'static,
    period: Duration,
    guard: StreamGuard,
) -> impl Stream<Item = Bytes> + Send + Sync {
    async_stream::stream! {
        let _guard = guard;

        debug!("Stream opened, heartbeat every {:?}", period);
        yield greeting;

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a fresh interval completes immediately; consume
        // it so heartbeats start one full period after the greeting.
        ticker.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(bytes) => yield bytes,
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    yield heartbeat();
                }
            }
        }
    }
}

/// Wrap a frame stream in the event-stream response envelope.
fn sse_response(
    stream: impl Stream<Item = Bytes> + Send + Sync + 'static,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let body = BodyExt::boxed(StreamBody::new(
        stream.map(|bytes| Ok::<_, Infallible>(Frame::data(bytes))),
    ));

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", HeaderValue::from_static("text/event-stream"))
        .header(
            "cache-control",
            HeaderValue::from_static("no-cache, no-transform"),
        )
        .header("connection", "keep-alive")
        .header("x-accel-buffering", "no")
        .body(body)
        .map_err(|e| anyhow!("Failed to build stream response: {}", e))
}

// ---------------------------------------------------------------------------
// Subscribe handlers
// ---------------------------------------------------------------------------

/// GET /api/orders/track/stream — per-order tracking channel.
///
/// ### Query parameters
/// | Param             | Description                                  |
/// |-------------------|----------------------------------------------|
/// | `order_id`        | Order to follow (alias: `orderId`)           |
/// | `tracking_number` | Shipment to follow (alias: `trackingNumber`) |
///
/// At least one is required; a request carrying neither is rejected with a
/// structured 400 before any event-stream transport is opened.
///
/// ### Event sequence emitted
/// ```text
/// event: connected        — handshake OK, server ready
/// event: heartbeat        — every heartbeat_secs of idle time
/// event: <live events>    — tracking_update / status_change / error /
///                           order_update frames matching the filter
/// ```
pub async fn handle_track_stream(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let params = parse_query(&req);

    let Some(filter) = StreamFilter::from_params(&params) else {
        warn!("Track stream rejected: missing order_id / tracking_number");
        let rejection = ErrorResponse::missing_tracking_key();
        return deliver_error_json(&rejection.code, &rejection.message, StatusCode::BAD_REQUEST);
    };

    let period = state.config.read().await.stream.heartbeat_interval();

    let (tx, rx) = mpsc::unbounded_channel();
    let id = state.broadcaster.register(Some(filter.clone()), tx).await;
    info!("Track stream connected: subscriber={} filter={:?}", id, filter);

    let guard = StreamGuard::new(id, Arc::clone(&state.broadcaster));
    let stream = frame_stream(
        rx,
        TrackingEvent::connected().to_frame().encode(),
        || TrackingEvent::heartbeat().to_frame().encode(),
        period,
        guard,
    );
    sse_response(stream)
}

/// GET /api/orders/stream — the generic order feed (firehose).
///
/// No parameters; every `created` / `updated` / `deleted` frame the order
/// handlers publish goes to every subscriber here. Greeting and liveness
/// use the plain `ping` framing rather than typed tracking events.
pub async fn handle_order_feed(
    _req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let period = state.config.read().await.stream.heartbeat_interval();

    let (tx, rx) = mpsc::unbounded_channel();
    let id = state.broadcaster.register(None, tx).await;
    info!("Order feed connected: subscriber={}", id);

    let guard = StreamGuard::new(id, Arc::clone(&state.broadcaster));
    let stream = frame_stream(
        rx,
        SseFrame::new("ping", "connected").encode(),
        || SseFrame::new("ping", "heartbeat").encode(),
        period,
        guard,
    );
    sse_response(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::sse::SseFrameDecoder;

    fn decode(bytes: &[Bytes]) -> Vec<SseFrame> {
        let mut dec = SseFrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes {
            frames.extend(dec.feed(chunk));
        }
        frames
    }

    async fn test_stream(
        period: Duration,
    ) -> (
        mpsc::UnboundedSender<Bytes>,
        std::pin::Pin<Box<dyn Stream<Item = Bytes> + Send>>,
        Arc<OrderBroadcaster>,
    ) {
        let broadcaster = Arc::new(OrderBroadcaster::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = broadcaster.register(None, tx.clone()).await;
        let guard = StreamGuard::new(id, Arc::clone(&broadcaster));
        let stream = frame_stream(
            rx,
            TrackingEvent::connected().to_frame().encode(),
            || TrackingEvent::heartbeat().to_frame().encode(),
            period,
            guard,
        );
        (tx, Box::pin(stream), broadcaster)
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_comes_before_any_heartbeat() {
        let (_tx, mut stream, _b) = test_stream(Duration::from_secs(20)).await;

        let first = stream.next().await.unwrap();
        let frames = decode(&[first]);
        assert_eq!(frames[0].event, "connected");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_emits_heartbeat_per_period() {
        let (_tx, mut stream, _b) = test_stream(Duration::from_secs(20)).await;

        let start = tokio::time::Instant::now();
        let _greeting = stream.next().await.unwrap();

        // With no traffic, the next three frames are heartbeats, one per
        // period, starting one full period after the greeting.
        for n in 1..=3u64 {
            let frame = stream.next().await.unwrap();
            let frames = decode(&[frame]);
            assert_eq!(frames[0].event, "heartbeat");
            assert_eq!(start.elapsed(), Duration::from_secs(20 * n));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn relayed_frames_interleave_with_heartbeats() {
        let (tx, mut stream, _b) = test_stream(Duration::from_secs(20)).await;
        let _greeting = stream.next().await.unwrap();

        tx.send(TrackingEvent::error("carrier feed degraded").to_frame().encode())
            .unwrap();
        let frames = decode(&[stream.next().await.unwrap()]);
        assert_eq!(frames[0].event, "error");

        // Next frame with nothing queued is the scheduled heartbeat
        let frames = decode(&[stream.next().await.unwrap()]);
        assert_eq!(frames[0].event, "heartbeat");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_unregisters_the_subscriber() {
        let (_tx, stream, broadcaster) = test_stream(Duration::from_secs(20)).await;
        assert_eq!(broadcaster.subscriber_count().await, 1);

        drop(stream);
        // The guard unregisters from a spawned task; yield until it ran
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }
}
