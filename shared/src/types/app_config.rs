use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// `Access-Control-Allow-Origin` value for the stream endpoints.
    /// Browser storefronts connect cross-origin; `"*"` is acceptable here
    /// because the stream carries no credentials.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Heartbeat cadence for open streams. Intermediary proxies and load
    /// balancers tend to kill idle connections after 30-60s; 20s keeps
    /// well under that.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Base delay between reconnect attempts. Attempt N waits N times this.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

impl ServerConfig {
    /// Full bind address for the stream server, e.g. `"0.0.0.0:4350"`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl ClientConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            auto_reconnect: true,
            notifications_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde defaults
// ---------------------------------------------------------------------------

pub fn default_port() -> u16 {
    4350
}

pub fn default_max_connections() -> usize {
    1000
}

pub fn default_cors_origin() -> String {
    "*".to_string()
}

pub fn default_heartbeat_secs() -> u64 {
    20
}

pub fn default_reconnect_interval_ms() -> u64 {
    3000
}

pub fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}
