//! Encoder: per-stream transcode orchestration (C5), a loopback HLS sink
//! the transcoder subprocess PUTs fragments into, an optional CDN fan-out
//! publisher (C12), and a control-plane client to the coordinator (C6).

pub mod cdn;
pub mod config;
pub mod control_client;
pub mod error;
pub mod sink;
pub mod storage_factory;
pub mod task;

use std::sync::Arc;

use crate::config::Config;
use crate::task::TaskRegistry;

/// Shared state for the loopback sink's axum handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TaskRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<AppState> {
        let config = Arc::new(config);
        let storage = storage_factory::build(&config.storage)?;
        let sink_base = format!("http://127.0.0.1:{}", config.sink_port);

        let registry = TaskRegistry::new(
            storage,
            sink_base,
            config.hls_time_seconds,
            config.hls_live_playlist_size,
            config.hls_vod_max_size,
            config.hls_fragment_count_limit,
            if config.cdn_enabled { config.cdn_urls.clone() } else { Vec::new() },
            config.cdn_push_secret.clone().unwrap_or_default(),
        );

        Ok(AppState { config, registry })
    }
}
