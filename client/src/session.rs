use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use shared::sse::SseFrame;
use shared::types::app_config::ClientConfig;
use shared::types::{OrderTrackingState, StatusChange, TrackingEvent, now_ms};

use crate::notify::{Notification, Notifier};
use crate::transport::{StreamTarget, StreamTransport};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Policy and target for one tracking subscription.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port` of the tracking server
    pub authority: String,
    pub order_id: Option<String>,
    pub tracking_number: Option<String>,
    /// Base reconnect delay; attempt N waits N times this (linear backoff).
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let policy = ClientConfig::default();
        Self {
            authority: String::new(),
            order_id: None,
            tracking_number: None,
            reconnect_interval: policy.reconnect_interval(),
            max_reconnect_attempts: policy.max_reconnect_attempts,
            auto_reconnect: policy.auto_reconnect,
        }
    }
}

impl SessionConfig {
    pub fn for_order(authority: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            order_id: Some(order_id.into()),
            ..Self::default()
        }
    }

    /// Apply the reconnect policy from a loaded `[client]` config section.
    pub fn with_policy(mut self, policy: &ClientConfig) -> Self {
        self.reconnect_interval = policy.reconnect_interval();
        self.max_reconnect_attempts = policy.max_reconnect_attempts;
        self.auto_reconnect = policy.auto_reconnect;
        self
    }

    pub fn has_subscription_key(&self) -> bool {
        self.order_id.is_some() || self.tracking_number.is_some()
    }

    fn target(&self) -> StreamTarget {
        StreamTarget {
            authority: self.authority.clone(),
            order_id: self.order_id.clone(),
            tracking_number: self.tracking_number.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// State + owner callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("An order id or tracking number is required to connect")]
    MissingSubscriptionKey,
}

/// What the session reports to its owner as things happen.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The stream came up (true) or went down (false).
    Connectivity(bool),
    /// A retry is scheduled; informational only.
    Reconnecting {
        attempt: u32,
        max: u32,
        delay: Duration,
    },
    /// All automatic retries used up; only an explicit `connect()` or a
    /// visibility signal will try again.
    ReconnectExhausted,
    /// Tracking state replaced wholesale.
    Tracking(OrderTrackingState),
    /// Raw status-change payload, as received.
    Status(StatusChange),
    /// Generic order update — reserved, forwarded without interpretation.
    Order(serde_json::Value),
    Error(String),
}

#[derive(Debug)]
struct SessionInner {
    state: ConnectionState,
    last_error: Option<String>,
    /// Consecutive failed attempts since the last successful connect.
    attempts: u32,
    /// Bumped on every connect/disconnect; tasks carrying a stale epoch
    /// silently stand down, which is what makes superseded transports and
    /// timers harmless.
    epoch: u64,
    tracking: Option<OrderTrackingState>,
    /// The task that owns the live transport handle. At most one.
    reader: Option<JoinHandle<()>>,
    /// The single pending-retry slot.
    pending_retry: Option<JoinHandle<()>>,
}

struct SessionCore {
    config: SessionConfig,
    transport: Arc<dyn StreamTransport>,
    notifier: Arc<Notifier>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    inner: Mutex<SessionInner>,
}

// ---------------------------------------------------------------------------
// TrackingSession
// ---------------------------------------------------------------------------

/// Owns one subscription's lifecycle: the transport, the reconnect policy,
/// and the translation of wire events into state changes and
/// notifications.
///
/// Lifecycle methods are host-agnostic — a service, a CLI, or a UI shell
/// drives `connect` / `disconnect` / `on_visible` the same way.
pub struct TrackingSession {
    core: Arc<SessionCore>,
}

impl TrackingSession {
    /// Returns the session plus the update receiver its owner drains.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn StreamTransport>,
        notifier: Arc<Notifier>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore {
            config,
            transport,
            notifier,
            updates,
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                last_error: None,
                attempts: 0,
                epoch: 0,
                tracking: None,
                reader: None,
                pending_retry: None,
            }),
        });
        (Self { core }, updates_rx)
    }

    /// Open the stream. Cancels any pending retry timer first, so a manual
    /// connect always preempts the backoff schedule.
    ///
    /// Fails fast — before any transport work — when the config carries
    /// neither an order id nor a tracking number.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if !self.core.config.has_subscription_key() {
            let message = SessionError::MissingSubscriptionKey.to_string();
            warn!("Connect rejected: {}", message);
            self.core.inner.lock().await.last_error = Some(message.clone());
            let _ = self.core.updates.send(SessionUpdate::Error(message));
            return Err(SessionError::MissingSubscriptionKey);
        }

        let expect = {
            let mut inner = self.core.inner.lock().await;
            if let Some(timer) = inner.pending_retry.take() {
                timer.abort();
            }
            inner.epoch
        };

        Arc::clone(&self.core).start_attempt(expect).await;
        Ok(())
    }

    /// Tear everything down. Safe to call any number of times in any
    /// state; a second call on an already-disconnected session is a no-op.
    pub async fn disconnect(&self) {
        let previous = {
            let mut inner = self.core.inner.lock().await;
            inner.epoch += 1;
            if let Some(timer) = inner.pending_retry.take() {
                timer.abort();
            }
            if let Some(reader) = inner.reader.take() {
                // Aborting the reader drops its transport handle, which
                // closes the transport.
                reader.abort();
            }
            let previous = inner.state;
            inner.state = ConnectionState::Disconnected;
            previous
        };

        if previous != ConnectionState::Disconnected {
            info!("Tracking session disconnected");
            let _ = self.core.updates.send(SessionUpdate::Connectivity(false));
        }
    }

    /// The consuming surface became active again. While disconnected with
    /// a valid key this connects immediately, outside the backoff
    /// schedule.
    pub async fn on_visible(&self) {
        let disconnected = {
            let inner = self.core.inner.lock().await;
            inner.state == ConnectionState::Disconnected
        };

        if disconnected && self.core.config.has_subscription_key() {
            debug!("Surface visible again; reconnecting immediately");
            let _ = self.connect().await;
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.core.inner.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub async fn last_error(&self) -> Option<String> {
        self.core.inner.lock().await.last_error.clone()
    }

    /// Consecutive failed attempts since the last successful connect.
    pub async fn reconnect_attempts(&self) -> u32 {
        self.core.inner.lock().await.attempts
    }

    /// The latest tracking state, if any `tracking_update` has arrived.
    pub async fn tracking_state(&self) -> Option<OrderTrackingState> {
        self.core.inner.lock().await.tracking.clone()
    }

    pub fn order_id(&self) -> Option<&str> {
        self.core.config.order_id.as_deref()
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        // Best-effort disposal so no timer or transport outlives the owner;
        // an explicit disconnect() beforehand is still the clean path.
        if let Ok(mut inner) = self.core.inner.try_lock() {
            inner.epoch += 1;
            if let Some(timer) = inner.pending_retry.take() {
                timer.abort();
            }
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            inner.state = ConnectionState::Disconnected;
        }
    }
}

// ---------------------------------------------------------------------------
// Connection driving
// ---------------------------------------------------------------------------

impl SessionCore {
    async fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().await.epoch == epoch
    }

    /// Begin one physical connection attempt, superseding whatever came
    /// before it. `expect_epoch` guards against racing lifecycle calls: if
    /// someone connected or disconnected since the caller looked, this
    /// attempt silently stands down.
    fn start_attempt(
        self: Arc<Self>,
        expect_epoch: u64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != expect_epoch {
                debug!("Connect attempt superseded before start");
                return;
            }
            inner.epoch += 1;
            inner.state = ConnectionState::Connecting;
            inner.pending_retry = None;
            // At most one live transport: the previous reader (and the
            // transport handle it owns) goes down before a new one opens.
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            inner.epoch
        };

        let reader = tokio::spawn(Arc::clone(&self).run_connection(epoch));

        let mut inner = self.inner.lock().await;
        if inner.epoch == epoch {
            inner.reader = Some(reader);
        } else {
            reader.abort();
        }
        })
    }

    async fn run_connection(self: Arc<Self>, epoch: u64) {
        let target = self.config.target();
        debug!("Opening stream to {}", target.authority);

        match self.transport.open(&target).await {
            Ok(mut handle) => {
                {
                    let mut inner = self.inner.lock().await;
                    if inner.epoch != epoch {
                        // Superseded while the open was in flight; dropping
                        // the handle closes the surplus transport.
                        return;
                    }
                    inner.state = ConnectionState::Connected;
                    inner.last_error = None;
                    inner.attempts = 0;
                }

                info!("Tracking stream connected");
                let _ = self.updates.send(SessionUpdate::Connectivity(true));
                self.notifier
                    .notify(Notification::info(
                        "Live tracking",
                        "Connected to live order tracking",
                    ))
                    .await;

                while let Some(frame) = handle.recv().await {
                    if !self.is_current(epoch).await {
                        return;
                    }
                    self.handle_frame(&frame).await;
                }

                debug!("Stream ended");
                Arc::clone(&self).schedule_reconnect(epoch).await;
            }
            Err(e) => {
                warn!("Stream open failed: {:#}", e);
                {
                    let mut inner = self.inner.lock().await;
                    if inner.epoch != epoch {
                        return;
                    }
                    inner.last_error = Some(e.to_string());
                }
                Arc::clone(&self).schedule_reconnect(epoch).await;
            }
        }
    }

    /// Transition to `Disconnected` and, policy permitting, arm the single
    /// pending-retry slot with a linearly growing delay.
    async fn schedule_reconnect(self: Arc<Self>, epoch: u64) {
        let attempt = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch {
                return;
            }

            let previous = inner.state;
            inner.state = ConnectionState::Disconnected;
            if previous == ConnectionState::Connected {
                let _ = self.updates.send(SessionUpdate::Connectivity(false));
            }

            if !self.config.auto_reconnect {
                debug!("Auto-reconnect disabled; staying disconnected");
                return;
            }

            if inner.attempts >= self.config.max_reconnect_attempts {
                info!(
                    "Reconnect attempts exhausted after {}; waiting for an explicit connect",
                    inner.attempts
                );
                drop(inner);
                let _ = self.updates.send(SessionUpdate::ReconnectExhausted);
                self.notifier
                    .notify(Notification::error(
                        "Live tracking unavailable",
                        "Could not reconnect to order tracking; updates are paused",
                    ))
                    .await;
                return;
            }

            inner.attempts += 1;
            inner.attempts
        };

        // Linear backoff: attempt N waits N times the base interval.
        let delay = self.config.reconnect_interval * attempt;
        let max = self.config.max_reconnect_attempts;
        info!("Reconnecting in {:?} (attempt {} of {})", delay, attempt, max);
        let _ = self.updates.send(SessionUpdate::Reconnecting {
            attempt,
            max,
            delay,
        });

        let core = Arc::clone(&self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Arc::clone(&core).start_attempt(epoch).await;
        });

        let mut inner = self.inner.lock().await;
        if inner.epoch == epoch {
            inner.pending_retry = Some(timer);
        } else {
            // A connect or disconnect won the race; stand down.
            timer.abort();
        }
    }

    async fn handle_frame(&self, frame: &SseFrame) {
        let event: TrackingEvent = match serde_json::from_str(&frame.data) {
            Ok(event) => event,
            Err(e) => {
                // Malformed payloads are dropped; the stream stays up.
                warn!("Discarding unparseable {:?} frame: {}", frame.event, e);
                return;
            }
        };

        match event {
            TrackingEvent::Connected { .. } => {
                debug!("Server handshake acknowledged");
            }
            TrackingEvent::TrackingUpdate { data, .. } => {
                let state = {
                    let mut inner = self.inner.lock().await;
                    let mut state = data;
                    // Wholesale replace — but last_updated never moves
                    // backwards within a session.
                    let floor = inner
                        .tracking
                        .as_ref()
                        .map(|t| t.last_updated)
                        .unwrap_or(0);
                    state.last_updated = now_ms().max(floor);
                    inner.tracking = Some(state.clone());
                    state
                };

                let has_new_update = state.has_new_update;
                let order_number = state.order_number.clone();
                let _ = self.updates.send(SessionUpdate::Tracking(state));

                if has_new_update {
                    self.notifier
                        .notify(Notification::info(
                            "Tracking updated",
                            format!("New tracking details for order #{}", order_number),
                        ))
                        .await;
                }
            }
            TrackingEvent::StatusChange { data, .. } => {
                let message = data.message.clone();
                let _ = self.updates.send(SessionUpdate::Status(data));
                self.notifier
                    .notify(Notification::status("Order status", message))
                    .await;
            }
            TrackingEvent::Heartbeat { .. } => {
                trace!("Heartbeat");
            }
            TrackingEvent::Error { message, .. } => {
                warn!("Server error event: {}", message);
                self.inner.lock().await.last_error = Some(message.clone());
                let _ = self.updates.send(SessionUpdate::Error(message.clone()));
                self.notifier
                    .notify(Notification::error("Tracking error", message))
                    .await;
            }
            TrackingEvent::OrderUpdate { data, .. } => {
                // Reserved for extension; forwarded without interpretation.
                let _ = self.updates.send(SessionUpdate::Order(data));
            }
        }
    }
}
