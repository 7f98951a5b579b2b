pub mod broadcast;
pub mod handlers;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use shared::config::LiveConfig;
use shared::types::now_ms;

use crate::broadcast::OrderBroadcaster;
use crate::middleware::Metrics;

/// Shared per-process state, cloned into every connection task.
///
/// The broadcaster is an explicit component instance rather than a
/// module-level singleton — handlers that emit events receive it through
/// this state, and tests construct isolated instances with fake handles.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: LiveConfig,
    pub broadcaster: Arc<OrderBroadcaster>,
    pub metrics: Metrics,
    /// Unix timestamp (ms) captured once at startup, for the stats surface.
    pub started_at: i64,
}

impl AppState {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            config,
            broadcaster: Arc::new(OrderBroadcaster::new()),
            metrics: Metrics::new(),
            started_at: now_ms(),
        }
    }
}
