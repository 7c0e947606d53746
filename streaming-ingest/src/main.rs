//! Ingest binary entry point: loads configuration, builds shared state,
//! and serves the WebSocket ingest surface with graceful shutdown on
//! Ctrl+C/SIGTERM.

use tracing::{error, info, warn};

use streaming_ingest::config::Config;
use streaming_ingest::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    streaming_common::init_logging(config.log_format, &config.log_level)?;

    if config.ssl_port.is_some() {
        warn!("SSL_PORT configured but TLS certificate loading is out of scope; serving plain HTTP only");
    }
    if config.control_base_url.is_none() {
        warn!("CONTROL_BASE_URL unset; every publish attempt will be denied");
    }

    let bind_address = config.bind_address.clone();
    let http_port = config.http_port;

    let state = AppState::new(config);
    let router = streaming_ingest::http::router(state);

    let addr = format!("{bind_address}:{http_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "ingest server listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("ingest server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
