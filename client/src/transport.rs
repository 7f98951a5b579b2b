use std::future::Future;
use std::pin::Pin;

use anyhow::{Context as _, Result, anyhow};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use shared::sse::{SseFrame, SseFrameDecoder};

/// Boxed future alias — transports are object-safe, so `open` returns a
/// pinned box rather than an opaque type.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Where one subscription connects and which order it follows.
#[derive(Debug, Clone, Default)]
pub struct StreamTarget {
    /// `host:port` of the tracking server, e.g. `"127.0.0.1:4350"`
    pub authority: String,
    pub order_id: Option<String>,
    pub tracking_number: Option<String>,
}

impl StreamTarget {
    /// Path + query for the tracking channel subscription request.
    pub fn request_path(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(order_id) = &self.order_id {
            query.append_pair("order_id", order_id);
        }
        if let Some(tracking_number) = &self.tracking_number {
            query.append_pair("tracking_number", tracking_number);
        }
        format!("/api/orders/track/stream?{}", query.finish())
    }
}

// ---------------------------------------------------------------------------
// Transport handle
// ---------------------------------------------------------------------------

/// One live stream. Owns the background tasks that drive it; dropping the
/// handle aborts them and closes the transport — that drop is how the
/// session guarantees at most one live transport at a time.
pub struct TransportHandle {
    frames: mpsc::Receiver<SseFrame>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportHandle {
    /// A handle with no backing tasks — used by tests that feed frames
    /// straight into the channel.
    pub fn new(frames: mpsc::Receiver<SseFrame>) -> Self {
        Self {
            frames,
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(frames: mpsc::Receiver<SseFrame>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { frames, tasks }
    }

    /// Next decoded frame; `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<SseFrame> {
        self.frames.recv().await
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait + HTTP implementation
// ---------------------------------------------------------------------------

/// Opens push streams. The production implementation speaks HTTP/1; tests
/// substitute a scripted fake to drive the session state machine.
pub trait StreamTransport: Send + Sync {
    /// Open one live stream to the target. Resolves once response headers
    /// have arrived; decoded frames then flow through the handle.
    fn open(&self, target: &StreamTarget) -> BoxFuture<Result<TransportHandle>>;
}

/// `StreamTransport` over plain HTTP/1 — connect, GET the stream endpoint,
/// decode the chunked body into frames as it arrives.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport;

impl StreamTransport for HttpTransport {
    fn open(&self, target: &StreamTarget) -> BoxFuture<Result<TransportHandle>> {
        let target = target.clone();
        Box::pin(async move {
            let stream = TcpStream::connect(&target.authority)
                .await
                .context(format!("Failed to connect to {}", target.authority))?;
            let io = TokioIo::new(stream);

            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .context("HTTP handshake failed")?;

            // The connection future must be polled for the request to make
            // progress; it lives in its own task until the handle drops.
            let conn_task = tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!("Stream connection ended: {}", e);
                }
            });

            let request = Request::builder()
                .method("GET")
                .uri(target.request_path())
                .header("host", target.authority.clone())
                .header("accept", "text/event-stream")
                .body(Empty::<Bytes>::new())
                .map_err(|e| anyhow!("Failed to build stream request: {}", e))?;

            let response = match sender.send_request(request).await {
                Ok(response) => response,
                Err(e) => {
                    conn_task.abort();
                    return Err(anyhow!("Stream request failed: {}", e));
                }
            };

            if !response.status().is_success() {
                conn_task.abort();
                return Err(anyhow!("Stream rejected with status {}", response.status()));
            }

            let (tx, rx) = mpsc::channel(64);
            let read_task = tokio::spawn(async move {
                let mut body = response.into_body();
                let mut decoder = SseFrameDecoder::new();

                while let Some(next) = body.frame().await {
                    match next {
                        Ok(frame) => {
                            let Some(chunk) = frame.data_ref() else {
                                continue; // trailers
                            };
                            for sse in decoder.feed(chunk) {
                                if tx.send(sse).await.is_err() {
                                    // Handle dropped mid-send; the abort
                                    // that follows also stops this task
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Stream read error: {}", e);
                            break;
                        }
                    }
                }
                // Falling out of the loop drops `tx`; the session sees the
                // stream end and applies its reconnect policy.
            });

            Ok(TransportHandle::with_tasks(rx, vec![read_task, conn_task]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_path_carries_both_keys() {
        let target = StreamTarget {
            authority: "127.0.0.1:4350".to_string(),
            order_id: Some("ord_1".to_string()),
            tracking_number: Some("JD 01".to_string()),
        };
        let path = target.request_path();
        assert!(path.starts_with("/api/orders/track/stream?"));
        assert!(path.contains("order_id=ord_1"));
        // Space must be form-encoded
        assert!(path.contains("tracking_number=JD+01"));
    }

    #[tokio::test]
    async fn dropping_the_handle_aborts_its_tasks() {
        let (_tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        let probe = task.abort_handle();

        let handle = TransportHandle::with_tasks(rx, vec![task]);
        drop(handle);

        // Aborted tasks finish promptly
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(probe.is_finished());
    }
}
