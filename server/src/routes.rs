use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{error, warn};

use crate::AppState;
use crate::handlers::{orders, stream};

// ---------------------------------------------------------------------------
// Handler type alias
//
// Every route is open: the stream endpoints accept the order/tracking
// identifier from the request and trust upstream identity, and the publish
// surface is reached only from the storefront's own order handlers.
// ---------------------------------------------------------------------------

type RouteHandler = Box<
    dyn Fn(
            Request<hyper::body::Incoming>,
            AppState,
        )
            -> Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send>>
        + Send
        + Sync,
>;

struct Route {
    method: Method,
    path: String,
    handler: RouteHandler,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    routes: Vec<Route>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes_count", &self.routes.len())
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn get<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<hyper::body::Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    pub fn post<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<hyper::body::Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    fn route<F, Fut>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Request<hyper::body::Incoming>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.routes.push(Route {
            method,
            path: path.to_string(),
            handler: Box::new(move |req, state| Box::pin(handler(req, state))),
        });
        self
    }

    /// Exact-match dispatch. Handler faults become a 500 JSON response so
    /// the connection task never sees an error from this layer.
    pub async fn dispatch(
        &self,
        req: Request<hyper::body::Incoming>,
        state: AppState,
    ) -> Response<BoxBody<Bytes, Infallible>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        for route in &self.routes {
            if route.method == method && route.path == path {
                return match (route.handler)(req, state).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("Handler for {} {} failed: {:#}", method, path, e);
                        error_response(
                            "INTERNAL_ERROR",
                            "An internal error occurred",
                            StatusCode::INTERNAL_SERVER_ERROR,
                        )
                    }
                };
            }
        }

        warn!("No route matched: {} {}", method, path);
        error_response("NOT_FOUND", "Resource not found", StatusCode::NOT_FOUND)
    }
}

impl Default for Router {
    fn default() -> Self {
        build_router()
    }
}

/// The full route table for the tracking stream server.
pub fn build_router() -> Router {
    Router::new()
        .get("/health", orders::handle_health)
        .get("/api/orders/stream", stream::handle_order_feed)
        .get("/api/orders/track/stream", stream::handle_track_stream)
        .post("/api/internal/orders/status", orders::handle_publish_status)
        .post("/api/internal/orders/event", orders::handle_publish_event)
}

/// Infallible error response — used where a `Result` would have nowhere
/// to go but the connection task.
fn error_response(
    code: &str,
    message: &str,
    status: StatusCode,
) -> Response<BoxBody<Bytes, Infallible>> {
    let body = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message,
    });

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())).boxed())
        .unwrap_or_else(|_| {
            let mut fallback =
                Response::new(Full::new(Bytes::from_static(b"{\"status\":\"error\"}")).boxed());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}
