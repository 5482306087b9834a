//! Triage indexer.
//!
//! Drains patient events from the event topic into Elasticsearch with
//! at-least-once semantics: offsets advance only after an event is indexed
//! or quarantined on the dead-letter topic.

mod config;
mod logging;
mod routes;
mod sink;

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use triage_events::connection::BrokerConnection;
use triage_events::{BatchProcessor, DeadLetterRouter, EventError, RetryPolicy};

use config::Config;
use routes::{AppState, SERVICE_NAME};
use sink::EsSink;

/// Holds everything the shutdown routine tears down: the broker connection,
/// the consumer loop handle, and the switch that stops it.
struct Lifecycle {
    connection: Arc<BrokerConnection>,
    shutdown_tx: watch::Sender<bool>,
    consumer_task: JoinHandle<Result<(), EventError>>,
}

impl Lifecycle {
    /// Stop the consumer at its next liveness gate, wait for the in-flight
    /// message to reach a terminal outcome, then close broker sessions.
    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        match self.consumer_task.await {
            Ok(Ok(())) => info!("consumer loop drained"),
            Ok(Err(e)) => error!(error = %e, "consumer loop ended with error"),
            Err(e) => error!(error = %e, "consumer task panicked"),
        }

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
        index = %config.elasticsearch_index,
        "starting indexer"
    );

    let connection = match BrokerConnection::connect(config.broker.clone()).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to connect to broker");
            std::process::exit(1);
        }
    };

    let sink = match EsSink::new(&config.elasticsearch_url, &config.elasticsearch_index) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to build elasticsearch client");
            std::process::exit(1);
        }
    };

    // Same bounded-retry discipline as the broker connect.
    let startup = RetryPolicy::default();
    if let Err(e) = startup.run("elasticsearch connect", || sink.ping()).await {
        error!(error = %e, "elasticsearch unreachable");
        std::process::exit(1);
    }
    if let Err(e) = startup.run("ensure index", || sink.ensure_index()).await {
        error!(error = %e, "failed to ensure patient events index");
        std::process::exit(1);
    }

    let consumer = match connection.consumer() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create consumer");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let processor = BatchProcessor::new(
        sink.clone(),
        DeadLetterRouter::new(
            Arc::new(connection.record_producer()),
            connection.config().dead_letter_topic.clone(),
            SERVICE_NAME,
        ),
        RetryPolicy::default(),
    );

    let consumer_task = tokio::spawn(async move { consumer.run(&processor, shutdown_rx).await });

    let lifecycle = Lifecycle {
        connection: Arc::clone(&connection),
        shutdown_tx,
        consumer_task,
    };

    let app = routes::router(AppState { connection, sink });

    let listener = match tokio::net::TcpListener::bind(config.bind_addr()).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %config.bind_addr(), "failed to bind listener");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    lifecycle.shutdown().await;
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
