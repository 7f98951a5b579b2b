use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use client::notify::Notifier;
use client::session::{SessionConfig, SessionUpdate, TrackingSession};
use client::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "watch", about = "Follow live tracking for one order from the terminal")]
struct Args {
    /// host:port of the tracking server
    #[arg(long, default_value = "127.0.0.1:4350")]
    server: String,

    /// Order to follow
    #[arg(long)]
    order_id: Option<String>,

    /// Shipment to follow
    #[arg(long)]
    tracking_number: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    let config = SessionConfig {
        authority: args.server,
        order_id: args.order_id,
        tracking_number: args.tracking_number,
        ..SessionConfig::default()
    };

    // No system notification channel in a terminal; everything lands on
    // the toast channel and is printed below.
    let (notifier, mut toasts) = Notifier::new(true, None);
    let (session, mut updates) = TrackingSession::new(config, Arc::new(HttpTransport), notifier);

    session.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            Some(update) = updates.recv() => match update {
                SessionUpdate::Tracking(state) => {
                    let location = state
                        .live_tracking
                        .as_ref()
                        .and_then(|live| live.current_location.clone())
                        .unwrap_or_else(|| "location unknown".to_string());
                    info!("Order #{}: {} ({})", state.order_number, state.status, location);
                }
                SessionUpdate::Status(change) => info!("{}", change.message),
                SessionUpdate::Connectivity(up) => {
                    info!("Stream {}", if up { "connected" } else { "disconnected" });
                }
                SessionUpdate::Reconnecting { attempt, max, delay } => {
                    warn!("Reconnecting in {:?} (attempt {} of {})", delay, attempt, max);
                }
                SessionUpdate::ReconnectExhausted => {
                    warn!("Gave up reconnecting; exiting");
                    break;
                }
                SessionUpdate::Error(message) => warn!("Stream error: {}", message),
                SessionUpdate::Order(data) => info!("Order update: {}", data),
            },
            Some(toast) = toasts.recv() => {
                info!("[{}] {}", toast.title, toast.body);
            }
        }
    }

    session.disconnect().await;
    Ok(())
}
