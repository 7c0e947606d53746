//! WS ingest server (C7-C8): publish/play WebSocket sessions, GOP cache,
//! per-IP admission control, and the control-plane client to the
//! coordinator.

pub mod channel;
pub mod config;
pub mod control_client;
pub mod gop_cache;
pub mod http;
pub mod ip_limit;
pub mod session;
pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::channel::ChannelRegistry;
use crate::config::Config;
use crate::control_client::ControlClient;
use crate::ip_limit::IpLimiter;

/// Every WS handler shares this state.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ChannelRegistry>,
    pub control: Arc<ControlClient>,
    pub ip_limiter: Arc<IpLimiter>,
    pub play_whitelist: Option<crate::ip_limit::CidrWhitelist>,
    next_session_id: AtomicU64,
}

impl AppState {
    pub fn new(config: Config) -> Arc<AppState> {
        let play_whitelist = config.play_whitelist.clone();
        let ip_limiter = Arc::new(IpLimiter::new(config.max_ip_concurrent_connections, config.concurrent_limit_whitelist.clone()));
        let config = Arc::new(config);
        let registry = Arc::new(ChannelRegistry::new());
        let control = ControlClient::spawn(config.clone(), registry.clone());

        Arc::new(AppState { config, registry, control, ip_limiter, play_whitelist, next_session_id: AtomicU64::new(1) })
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }
}
