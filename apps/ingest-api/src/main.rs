//! Triage ingest API.
//!
//! Accepts patient events over HTTP, validates them, and publishes them to
//! the event topic with bounded retry and dead-letter fallback.

mod config;
mod logging;
mod routes;
mod state;

use std::sync::Arc;

use tokio::signal;
use tracing::info;
use triage_events::connection::BrokerConnection;

use config::Config;
use state::{AppState, SERVICE_NAME};

/// Holds everything the shutdown routine tears down, constructed at startup
/// and passed explicitly rather than captured from ambient scope.
struct Lifecycle {
    connection: Arc<BrokerConnection>,
}

impl Lifecycle {
    fn shutdown(self) {
        self.connection.shutdown();
        info!(service = SERVICE_NAME, "shutdown complete");
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.bind_addr(),
        "starting ingest-api"
    );

    // Connection retries are bounded; exhaustion is fatal at startup.
    let connection = match BrokerConnection::connect(config.broker.clone()).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to broker");
            std::process::exit(1);
        }
    };

    let lifecycle = Lifecycle {
        connection: Arc::clone(&connection),
    };

    let app = routes::router(AppState::new(connection));

    let listener = match tokio::net::TcpListener::bind(config.bind_addr()).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr(), "failed to bind listener");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }

    lifecycle.shutdown();
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
