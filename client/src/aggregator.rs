use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use shared::types::OrderTrackingState;
use shared::types::app_config::ClientConfig;

use crate::notify::Notifier;
use crate::session::{SessionConfig, SessionUpdate, TrackingSession};
use crate::transport::StreamTransport;

// ---------------------------------------------------------------------------
// MultiOrderTracker
// ---------------------------------------------------------------------------

struct TrackerChild {
    order_id: String,
    session: TrackingSession,
    pump: JoinHandle<()>,
}

/// Composes one tracking session per order id into a single read model:
/// state-by-order and connected-by-order maps plus aggregate connectivity.
///
/// Children are fully independent — one session failing or backing off
/// never affects its siblings. Duplicate order ids are not de-duplicated
/// here; that is the caller's responsibility.
pub struct MultiOrderTracker {
    children: Vec<TrackerChild>,
    states: Arc<Mutex<HashMap<String, OrderTrackingState>>>,
    connected: Arc<Mutex<HashMap<String, bool>>>,
}

impl MultiOrderTracker {
    /// Build from pre-constructed sessions, one `(order_id, session,
    /// updates)` triple each. Use [`for_orders`](Self::for_orders) for the
    /// common case.
    pub fn new(
        sessions: Vec<(
            String,
            TrackingSession,
            mpsc::UnboundedReceiver<SessionUpdate>,
        )>,
    ) -> Self {
        let states: Arc<Mutex<HashMap<String, OrderTrackingState>>> = Arc::default();
        let connected: Arc<Mutex<HashMap<String, bool>>> = Arc::default();

        let mut children = Vec::with_capacity(sessions.len());
        for (order_id, session, updates) in sessions {
            let pump = spawn_pump(
                order_id.clone(),
                updates,
                Arc::clone(&states),
                Arc::clone(&connected),
            );
            children.push(TrackerChild {
                order_id,
                session,
                pump,
            });
        }

        Self {
            children,
            states,
            connected,
        }
    }

    /// One session per order id against the same server, sharing a
    /// transport and a notifier. The id order is preserved.
    pub fn for_orders(
        authority: &str,
        order_ids: &[String],
        policy: &ClientConfig,
        transport: Arc<dyn StreamTransport>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let sessions = order_ids
            .iter()
            .map(|order_id| {
                let config =
                    SessionConfig::for_order(authority, order_id.clone()).with_policy(policy);
                let (session, updates) =
                    TrackingSession::new(config, Arc::clone(&transport), Arc::clone(&notifier));
                (order_id.clone(), session, updates)
            })
            .collect();
        Self::new(sessions)
    }

    /// Connect every child. Per-child validation failures are isolated and
    /// skipped, not propagated.
    pub async fn start_all(&self) {
        for child in &self.children {
            if child.session.connect().await.is_err() {
                debug!("Session for order {} refused to start", child.order_id);
            }
        }
    }

    /// Explicit reconnect across the board — cancels any per-child backoff
    /// timers and retries immediately.
    pub async fn reconnect_all(&self) {
        for child in &self.children {
            let _ = child.session.connect().await;
        }
    }

    pub async fn stop_all(&self) {
        for child in &self.children {
            child.session.disconnect().await;
        }
    }

    /// Forward a visibility-regained signal to every child.
    pub async fn on_visible(&self) {
        for child in &self.children {
            child.session.on_visible().await;
        }
    }

    /// Logical OR across child connectivity.
    pub async fn is_any_connected(&self) -> bool {
        self.connected.lock().await.values().any(|&up| up)
    }

    /// Logical AND across child connectivity; vacuously true with no
    /// children.
    pub async fn all_connected(&self) -> bool {
        let connected = self.connected.lock().await;
        self.children
            .iter()
            .all(|child| connected.get(&child.order_id).copied().unwrap_or(false))
    }

    /// Snapshot of the merged state mapping.
    pub async fn states(&self) -> HashMap<String, OrderTrackingState> {
        self.states.lock().await.clone()
    }

    /// Snapshot of per-order connectivity.
    pub async fn connected_by_order(&self) -> HashMap<String, bool> {
        self.connected.lock().await.clone()
    }

    pub fn order_ids(&self) -> Vec<&str> {
        self.children
            .iter()
            .map(|child| child.order_id.as_str())
            .collect()
    }
}

impl Drop for MultiOrderTracker {
    fn drop(&mut self) {
        for child in &self.children {
            child.pump.abort();
        }
        // Child sessions clean their own transports up in their Drop.
    }
}

fn spawn_pump(
    order_id: String,
    mut updates: mpsc::UnboundedReceiver<SessionUpdate>,
    states: Arc<Mutex<HashMap<String, OrderTrackingState>>>,
    connected: Arc<Mutex<HashMap<String, bool>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                SessionUpdate::Tracking(state) => {
                    states.lock().await.insert(order_id.clone(), state);
                }
                SessionUpdate::Connectivity(up) => {
                    connected.lock().await.insert(order_id.clone(), up);
                }
                SessionUpdate::ReconnectExhausted => {
                    connected.lock().await.insert(order_id.clone(), false);
                }
                // Status / Order / Error / Reconnecting updates carry no
                // aggregate state; per-order consumers subscribe directly.
                _ => {}
            }
        }
    })
}
