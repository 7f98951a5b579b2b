use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderValue;
use hyper::{Method, Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::warn;

/// Tower layer for CORS
///
/// Browser storefronts open the stream endpoints cross-origin, so every
/// response carries `Access-Control-Allow-Origin` and preflight OPTIONS
/// requests are answered here without reaching the router.
#[derive(Clone)]
pub struct CorsLayer {
    allow_origin: HeaderValue,
}

impl CorsLayer {
    /// An origin that is not a valid header value falls back to `*` with a
    /// warning rather than refusing to serve.
    pub fn new(allow_origin: &str) -> Self {
        let allow_origin = HeaderValue::from_str(allow_origin).unwrap_or_else(|_| {
            warn!("Invalid cors_origin {:?}, falling back to \"*\"", allow_origin);
            HeaderValue::from_static("*")
        });
        Self { allow_origin }
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService {
            inner,
            allow_origin: self.allow_origin.clone(),
        }
    }
}

/// The actual service that applies the CORS headers
#[derive(Clone)]
pub struct CorsService<S> {
    inner: S,
    allow_origin: HeaderValue,
}

impl<S, ReqBody> Service<Request<ReqBody>> for CorsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<BoxBody<Bytes, Infallible>>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let allow_origin = self.allow_origin.clone();

        if req.method() == Method::OPTIONS {
            // Preflight — answered here, never routed
            let response = Response::builder()
                .status(StatusCode::NO_CONTENT)
                .header("access-control-allow-origin", allow_origin)
                .header("access-control-allow-methods", "GET, POST, OPTIONS")
                .header("access-control-allow-headers", "content-type")
                .header("access-control-max-age", "86400")
                .body(Full::new(Bytes::new()).boxed())
                .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()).boxed()));
            return Box::pin(std::future::ready(Ok(response)));
        }

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut response = inner.call(req).await?;
            response
                .headers_mut()
                .insert("access-control-allow-origin", allow_origin);
            Ok(response)
        })
    }
}
