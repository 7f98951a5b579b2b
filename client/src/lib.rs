pub mod aggregator;
pub mod notify;
pub mod session;
pub mod transport;

pub use aggregator::MultiOrderTracker;
pub use notify::{Notification, NotificationLevel, Notifier, SystemNotifier};
pub use session::{ConnectionState, SessionConfig, SessionError, SessionUpdate, TrackingSession};
pub use transport::{HttpTransport, StreamTarget, StreamTransport, TransportHandle};
