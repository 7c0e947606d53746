//! Encoder binary entry point: loads configuration, starts the persistent
//! control-plane client to the coordinator, and serves the loopback HLS
//! sink the local transcoder subprocesses PUT fragments into.

use tracing::{error, info, warn};

use streaming_encoder::config::Config;
use streaming_encoder::control_client::ControlClient;
use streaming_encoder::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    streaming_common::init_logging(config.log_format, &config.log_level)?;

    if config.control_base_url.is_none() {
        warn!("CONTROL_BASE_URL unset; encoder will not register with a coordinator");
    }

    let bind_address = config.sink_bind_address.clone();
    let sink_port = config.sink_port;

    let state = AppState::new(config)?;
    ControlClient::spawn(state.config.clone(), state.registry.clone());

    let router = streaming_encoder::sink::router(state.registry);

    let addr = format!("{bind_address}:{sink_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "encoder loopback sink listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    info!("encoder shut down gracefully");
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
