use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use hyper::Request;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

// Error tracing
use anyhow::Context;
use tracing::{debug, error, info, warn};

use server::AppState;
use server::middleware::{CorsLayer, MetricsLayer};
use server::routes::{Router, build_router};
use shared::config::{LiveConfig, load_config};

#[derive(Parser, Debug)]
#[command(name = "server", about = "Order-tracking stream server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let addr: SocketAddr = config
        .server
        .addr()
        .parse()
        .context(format!("Invalid bind address {}", config.server.addr()))?;

    let state = AppState::new(LiveConfig::new(config));
    let router = Arc::new(build_router());

    // SIGHUP hot-reload: swap the live config in place; a bad file keeps
    // the old config running.
    spawn_sighup_reload(state.config.clone(), args.config.clone());

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let state = state.clone();
        let router = Arc::clone(&router);

        tokio::task::spawn(async move {
            // Fresh layers per connection so a SIGHUP config change shows
            // up in the CORS header of later connections.
            let cors_origin = state.config.read().await.server.cors_origin.clone();
            let service = tower::ServiceBuilder::new()
                .layer(MetricsLayer::new(state.metrics.clone()))
                .layer(CorsLayer::new(&cors_origin))
                .service(RoutedService { router, state });

            // Handle the connection from the client using HTTP1 and pass
            // any HTTP requests received on that connection to the router
            if let Err(err) = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, TowerToHyperService::new(service))
                .await
            {
                debug!("Error serving connection from {}: {:?}", peer, err);
            }
        });
    }
}

/// The routed tower service at the bottom of the middleware stack.
#[derive(Clone)]
struct RoutedService {
    router: Arc<Router>,
    state: AppState,
}

impl tower::Service<Request<hyper::body::Incoming>> for RoutedService {
    type Response =
        hyper::Response<http_body_util::combinators::BoxBody<bytes::Bytes, Infallible>>;
    type Error = Infallible;
    type Future =
        std::pin::Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        let router = Arc::clone(&self.router);
        let state = self.state.clone();
        Box::pin(async move { Ok(router.dispatch(req, state).await) })
    }
}

fn spawn_sighup_reload(live: LiveConfig, path: String) {
    tokio::spawn(async move {
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("SIGHUP handler unavailable, hot-reload disabled: {}", e);
                return;
            }
        };

        while hup.recv().await.is_some() {
            match load_config(&path) {
                Ok(new_config) => {
                    live.reload(new_config).await;
                    info!("Configuration reloaded on SIGHUP");
                }
                Err(e) => error!("SIGHUP reload failed, keeping old config: {}", e),
            }
        }
    });
}
