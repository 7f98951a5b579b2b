use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// Low-priority informational ("tracking details refreshed")
    Info,
    /// Order status changed — the notification customers care about
    Status,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn status(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Status,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            body: body.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// System channel
// ---------------------------------------------------------------------------

/// Host-level notification channel (desktop or browser push).
///
/// Implementations are expected to auto-dismiss after 5 seconds and focus
/// the host surface on click; neither behavior is observable from here.
pub trait SystemNotifier: Send + Sync {
    /// Ask the host for permission. The notifier calls this lazily, at
    /// most once per session.
    fn request_permission(&self) -> bool;

    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Routes notifications to the best available channel.
///
/// System notifications are used when an implementation is present and the
/// (lazily requested, cached) permission was granted; everything else —
/// permission denied, no system channel, delivery failure — falls back to
/// the in-app toast channel. Nothing here is ever fatal to the caller.
pub struct Notifier {
    enabled: bool,
    system: Option<Arc<dyn SystemNotifier>>,
    /// `None` until the first delivery attempt triggers the request.
    permission: Mutex<Option<bool>>,
    toast_tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Returns the notifier plus the toast receiver the host UI drains.
    pub fn new(
        enabled: bool,
        system: Option<Arc<dyn SystemNotifier>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (toast_tx, toast_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                enabled,
                system,
                permission: Mutex::new(None),
                toast_tx,
            }),
            toast_rx,
        )
    }

    /// A notifier that silently drops everything — for hosts that turned
    /// notifications off entirely.
    pub fn disabled() -> Arc<Self> {
        let (notifier, _toast_rx) = Self::new(false, None);
        notifier
    }

    pub async fn notify(&self, notification: Notification) {
        if !self.enabled {
            debug!("Notifications disabled; dropping {:?}", notification.level);
            return;
        }

        if let Some(system) = &self.system {
            let granted = {
                let mut permission = self.permission.lock().await;
                *permission.get_or_insert_with(|| {
                    let granted = system.request_permission();
                    debug!("Notification permission requested: granted={}", granted);
                    granted
                })
            };

            if granted {
                match system.notify(&notification) {
                    Ok(()) => return,
                    Err(e) => {
                        warn!("System notification failed, falling back to toast: {}", e)
                    }
                }
            }
        }

        if self.toast_tx.send(notification).is_err() {
            debug!("Toast receiver dropped; notification discarded");
        }
    }
}
