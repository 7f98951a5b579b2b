use serde::Serialize;

use crate::types::app_config::AppConfig;
use crate::types::event::now_ms;

/// Point-in-time snapshot of runtime server statistics.
/// Serialized and returned by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub server: ServerInfo,
    pub streams: StreamInfo,
    pub runtime: RuntimeInfo,
}

/// Static server configuration values shown in the stats response
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub bind: String,
    pub port: u16,
    pub max_connections: usize,
}

/// Live stream-pipeline counts (populated at query time)
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub active_subscribers: usize,
    pub requests_total: u64,
    pub errors_total: u64,
}

/// Runtime process info
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    /// Unix timestamp (ms) of when the server process started
    pub started_at: i64,
    /// Seconds elapsed since startup
    pub uptime_secs: i64,
}

impl ServerStats {
    /// Build a stats snapshot from config + live pipeline counts.
    ///
    /// `config` is typically a short-lived read guard from `LiveConfig`;
    /// `started_at` should be captured once at process startup and passed in.
    pub fn build(config: &AppConfig, streams: StreamInfo, started_at: i64) -> Self {
        Self {
            server: ServerInfo {
                bind: config.server.bind.clone(),
                port: config.server.port,
                max_connections: config.server.max_connections,
            },
            streams,
            runtime: RuntimeInfo {
                started_at,
                uptime_secs: (now_ms() - started_at) / 1000,
            },
        }
    }
}
