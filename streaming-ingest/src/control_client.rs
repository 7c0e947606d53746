//! Ingest↔coordinator control client (C8): a persistent outbound
//! WebSocket dial carrying PUBLISH-REQUEST/PUBLISH-END and receiving
//! STREAM-KILL, with request/response correlation and reconnect backoff.
//!
//! Grounded on `original_source/rtmp-server/ws_control_connection.go`'s
//! `Connect`/`Reconnect`/`RunReaderLoop`/`RunHeartBeatLoop` shape (no
//! REGISTER is sent here — that is encoder-only, see `streaming-encoder`),
//! and `original_source/hls-encoder/control_connection.go`'s
//! `ControlServerPendingRequest` request/response correlation pattern,
//! adapted from a channel-per-request map to an async oneshot per request.
//! The outbound dial itself uses `tokio-tungstenite`, the pack's WS-client
//! crate (axum only provides the server side; see the workspace
//! `Cargo.toml` comment above the dependency).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as TMessage;

use streaming_common::control_token::ControlKind;
use streaming_message::ControlMessage;

use crate::channel::ChannelRegistry;
use crate::config::Config;

const READ_TIMEOUT: Duration = Duration::from_secs(60);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(20);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct PublishOutcome {
    pub accepted: bool,
    pub stream_id: Option<String>,
}

pub struct ControlClient {
    config: Arc<Config>,
    registry: Arc<ChannelRegistry>,
    outbox: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: DashMap<String, oneshot::Sender<PublishOutcome>>,
}

impl ControlClient {
    /// Builds the client and, if `CONTROL_BASE_URL` is configured, spawns
    /// the persistent dial-reconnect loop in the background.
    pub fn spawn(config: Arc<Config>, registry: Arc<ChannelRegistry>) -> Arc<ControlClient> {
        let client = Arc::new(ControlClient { config, registry, outbox: Mutex::new(None), pending: DashMap::new() });

        if client.config.control_base_url.is_some() {
            let client = client.clone();
            tokio::spawn(async move { client.run().await });
        } else {
            tracing::warn!("CONTROL_BASE_URL unset; control client disabled, all publish attempts will be denied");
        }

        client
    }

    async fn run(self: Arc<Self>) {
        loop {
            match self.connect_once().await {
                Ok(()) => tracing::info!("control connection closed"),
                Err(e) => tracing::warn!(error = %e, "control connection failed"),
            }
            *self.outbox.lock() = None;
            self.pending.clear();
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_once(&self) -> anyhow::Result<()> {
        let base = self.config.control_base_url.as_ref().expect("checked by caller in spawn");
        let url = format!("{}/ws/control/wss", base.trim_end_matches('/'));

        let secret = self.config.control_secret.clone().unwrap_or_default();
        let token = streaming_common::control_token::sign(ControlKind::Wss, &secret);

        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("x-control-auth-token", HeaderValue::from_str(&token)?);
        headers.insert("x-external-ip", HeaderValue::from_str(&self.config.external_ip).unwrap_or(HeaderValue::from_static("")));
        headers.insert("x-custom-port", HeaderValue::from_str(&self.config.external_port.to_string())?);
        headers.insert("x-ssl-use", HeaderValue::from_static(if self.config.external_ssl { "true" } else { "false" }));

        let (ws_stream, _response) = connect_async(request).await?;
        tracing::info!("control connection established");
        let (mut sink, mut stream) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbox.lock() = Some(tx.clone());

        let heartbeat_tx = tx.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(ControlMessage::Heartbeat.to_wire()).is_err() {
                    break;
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(TMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let next = tokio::time::timeout(READ_TIMEOUT, stream.next()).await;
            let frame = match next {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    heartbeat.abort();
                    writer.abort();
                    return Err(e.into());
                }
                Ok(None) => break,
                Err(_) => {
                    heartbeat.abort();
                    writer.abort();
                    anyhow::bail!("control connection heartbeat timed out");
                }
            };

            let text = match frame {
                TMessage::Text(text) => text,
                TMessage::Close(_) => break,
                _ => continue,
            };

            match ControlMessage::from_wire(&text) {
                Ok(message) => self.handle_inbound(message).await,
                Err(e) => tracing::warn!(error = %e, "malformed control message from coordinator"),
            }
        }

        heartbeat.abort();
        writer.abort();
        Ok(())
    }

    async fn handle_inbound(&self, message: ControlMessage) {
        match message {
            ControlMessage::Heartbeat => {}
            ControlMessage::PublishAccept { request_id, stream_id, .. } => {
                if let Some((_, waiter)) = self.pending.remove(&request_id) {
                    let _ = waiter.send(PublishOutcome { accepted: true, stream_id: Some(stream_id) });
                }
            }
            ControlMessage::PublishDeny { request_id, .. } => {
                if let Some((_, waiter)) = self.pending.remove(&request_id) {
                    let _ = waiter.send(PublishOutcome { accepted: false, stream_id: None });
                }
            }
            ControlMessage::StreamKill { channel, stream_id } => {
                let handle = self.registry.acquire(&channel);
                handle.with_state(|s| {
                    if let Some(publisher) = &s.publisher {
                        if publisher.stream_id == stream_id {
                            publisher.kill.cancel();
                        }
                    }
                });
                self.registry.release(handle);
            }
            other => tracing::debug!(message = ?other, "ignoring unexpected inbound control message"),
        }
    }

    /// Drives a PUBLISH-REQUEST end-to-end: sends it, waits up to 20s for a
    /// correlated PUBLISH-ACCEPT/DENY, and synthesizes a denial on timeout
    /// or when no control connection is currently established.
    pub async fn publish_request(&self, channel: &str, key: &str, user_ip: &str) -> PublishOutcome {
        let Some(tx) = self.outbox.lock().clone() else {
            return PublishOutcome { accepted: false, stream_id: None };
        };

        let request_id = generate_request_id();
        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), resp_tx);

        let message = ControlMessage::PublishRequest {
            request_id: request_id.clone(),
            channel: channel.to_string(),
            key: key.to_string(),
            user_ip: user_ip.to_string(),
        };
        if tx.send(message.to_wire()).is_err() {
            self.pending.remove(&request_id);
            return PublishOutcome { accepted: false, stream_id: None };
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, resp_rx).await {
            Ok(Ok(outcome)) => outcome,
            _ => {
                self.pending.remove(&request_id);
                PublishOutcome { accepted: false, stream_id: None }
            }
        }
    }

    /// Fire-and-forget PUBLISH-END: the coordinator does not reply.
    pub fn publish_end(&self, channel: &str, stream_id: &str) {
        if let Some(tx) = self.outbox.lock().as_ref() {
            let message = ControlMessage::PublishEnd { channel: channel.to_string(), stream_id: stream_id.to_string() };
            let _ = tx.send(message.to_wire());
        }
    }
}

fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}
