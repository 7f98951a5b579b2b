use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use hyper::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Cheaply-cloneable request counters, shared between the middleware and
/// the `/health` handler.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    in_flight: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn request_start(&self) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn request_end(&self, elapsed: std::time::Duration) {
        self.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        debug!("Request completed in {:?}", elapsed);
    }

    fn record_error(&self) {
        self.inner.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.inner.requests_total.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.inner.errors_total.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.inner.in_flight.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Layer + service
// ---------------------------------------------------------------------------

/// Tower layer for metrics tracking
///
/// This wraps any service and tracks request metrics; 4xx/5xx responses
/// count as errors. Note that for an accepted stream the request is
/// "complete" when the response headers go out — open streams are tracked
/// by the broadcaster's subscriber count, not by `in_flight`.
#[derive(Clone)]
pub struct MetricsLayer {
    metrics: Metrics,
}

impl MetricsLayer {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

/// The actual service that performs metrics tracking
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: Metrics,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let metrics = self.metrics.clone();
        let mut inner = self.inner.clone();

        metrics.request_start();
        let start = Instant::now();

        Box::pin(async move {
            let result = inner.call(req).await;

            metrics.request_end(start.elapsed());

            match &result {
                Ok(response) => {
                    // Track 4xx and 5xx as errors
                    if response.status().is_client_error() || response.status().is_server_error() {
                        metrics.record_error();
                    }
                }
                Err(_) => {
                    metrics.record_error();
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use http_body_util::combinators::BoxBody;
    use hyper::StatusCode;
    use std::convert::Infallible;
    use tower::ServiceExt;

    /// Inner test service answering every request with a fixed status.
    #[derive(Clone)]
    struct StaticResponse(StatusCode);

    impl Service<Request<String>> for StaticResponse {
        type Response = Response<BoxBody<Bytes, Infallible>>;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<String>) -> Self::Future {
            let mut resp = Response::new(Full::new(Bytes::new()).boxed());
            *resp.status_mut() = self.0;
            std::future::ready(Ok(resp))
        }
    }

    #[tokio::test]
    async fn counts_requests_and_errors() {
        let metrics = Metrics::new();

        let mut ok_svc =
            MetricsLayer::new(metrics.clone()).layer(StaticResponse(StatusCode::OK));
        let mut bad_svc =
            MetricsLayer::new(metrics.clone()).layer(StaticResponse(StatusCode::BAD_REQUEST));

        let req = || Request::new(String::new());
        ok_svc.ready().await.unwrap().call(req()).await.unwrap();
        ok_svc.ready().await.unwrap().call(req()).await.unwrap();
        bad_svc.ready().await.unwrap().call(req()).await.unwrap();

        assert_eq!(metrics.requests_total(), 3);
        assert_eq!(metrics.errors_total(), 1);
        assert_eq!(metrics.in_flight(), 0);
    }
}
