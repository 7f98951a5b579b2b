/// Tower middleware for the connection service stack:
/// - CORS for browser storefronts connecting cross-origin
/// - request / error counters surfaced on `GET /health`
///
/// Layers wrap the routed service and are bridged into hyper with
/// `hyper_util::service::TowerToHyperService`.
pub mod cors;
pub mod metrics;

pub use cors::{CorsLayer, CorsService};
pub use metrics::{Metrics, MetricsLayer, MetricsService};
