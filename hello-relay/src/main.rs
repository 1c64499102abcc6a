//! Hello Relay - HTTP front end for a single RabbitMQ queue.
//!
//! This binary:
//! - Reads broker settings from the environment
//! - Connects to RabbitMQ and declares the `hello` queue
//! - Serves `/send` and `/consume` over HTTP
//!
//! Any startup failure exits before the HTTP listener is bound.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::web::{router, AppState};
use relay::{Broker, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!(version = relay::VERSION, "relay_starting");

    let config = Config::from_env()
        .inspect_err(|e| error!(error = %e, "config_invalid"))
        .context("Failed to load configuration")?;
    info!(
        port = config.port,
        server = %config.server,
        vhost = %config.vhost,
        user = %config.user,
        "config_loaded"
    );

    let broker = Broker::connect(&config)
        .await
        .inspect_err(|e| error!(error = %e, "rabbitmq_setup_failed"))
        .context("Failed to set up RabbitMQ")?;
    let broker = Arc::new(broker);

    let app = router(AppState::new(broker.clone()));

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .inspect_err(|e| error!(error = %e, address = %addr, "bind_failed"))
        .context("Failed to bind to address")?;

    info!(address = %addr, "relay_listening");

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    broker.close().await;

    info!("relay_shutdown_complete");

    Ok(())
}

/// Resolve once SIGINT or SIGTERM arrives.
///
/// A handler that cannot be installed never fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, signal = "SIGINT", "relay_signal_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, signal = "SIGTERM", "relay_signal_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    info!(signal = received, "relay_shutdown_requested");
}
