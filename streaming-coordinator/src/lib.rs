//! Coordinator: the single source of truth for channels, publishers, and
//! encoder assignment (C9-C11), reachable over the control-plane WebSocket
//! surface and a small HTTP commands API (§6).

pub mod active_streams;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod handshake;
pub mod http;
pub mod key_verification;
pub mod lifecycle;
pub mod sessions;
pub mod stream_id;
pub mod validation;

use std::sync::Arc;

use crate::active_streams::ActiveStreamStore;
use crate::channel::ChannelRegistry;
use crate::config::Config;
use crate::event::EventDispatcher;
use crate::handshake::Handshake;
use crate::key_verification::KeyVerificationClient;
use crate::lifecycle::Lifecycle;
use crate::sessions::SessionRegistry;

/// Every handler (HTTP and control-WebSocket) shares this state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ChannelRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub handshake: Arc<Handshake>,
    pub lifecycle: Arc<Lifecycle>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<AppState> {
        let config = Arc::new(config);
        let registry = Arc::new(ChannelRegistry::new());
        let sessions = Arc::new(SessionRegistry::new());

        let key_verification =
            Arc::new(KeyVerificationClient::new(config.key_verification_url.clone(), config.key_verification_auth.clone()));
        let handshake = Arc::new(Handshake {
            registry: registry.clone(),
            sessions: sessions.clone(),
            key_verification,
            id_max_length: config.id_max_length,
        });

        let active_streams = Arc::new(ActiveStreamStore::load(config.active_streams_path.clone()).await?);
        let dispatcher = Arc::new(EventDispatcher::new(config.event_callback_url.clone(), config.event_callback_auth.clone()));
        let lifecycle =
            Arc::new(Lifecycle { registry: registry.clone(), sessions: sessions.clone(), active_streams: active_streams.clone(), dispatcher });

        for entry in active_streams.snapshot() {
            tracing::info!(channel = %entry.channel, stream_id = %entry.stream_id, "recovered active stream at startup; scheduling stream-closed delivery");
            lifecycle.schedule_recovered(entry);
        }

        Ok(AppState { config, registry, sessions, handshake, lifecycle })
    }
}
