//! Encoder↔coordinator control client (C6): REGISTER-on-connect with
//! capacity, ENCODE-START/STOP dispatch to the `TaskRegistry`, and
//! STREAM-AVAILABLE/STREAM-CLOSED emission back out.
//!
//! Grounded on `streaming-ingest::control_client`'s dial/reconnect shape
//! (`connect_once`, heartbeat task, writer task, 60s read timeout, 10s
//! reconnect delay, `ControlKind`-tagged HMAC token, the same
//! `x-external-ip`/`x-custom-port`/`x-ssl-use` headers); the encoder's
//! client additionally sends REGISTER right after connecting and has no
//! request/response correlation to track (ENCODE-START/STOP are
//! fire-and-forget from the coordinator's side).

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use streaming_hls::{PreviewsConfig, ResolutionList};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as TMessage;

use streaming_common::control_token::ControlKind;
use streaming_message::ControlMessage;

use crate::config::Config;
use crate::task::{StreamEventSink, TaskRegistry};

const READ_TIMEOUT: Duration = Duration::from_secs(60);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(20);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

pub struct ControlClient {
    config: Arc<Config>,
    registry: Arc<TaskRegistry>,
    outbox: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl StreamEventSink for ControlClient {
    fn stream_available(&self, channel: &str, stream_id: &str, stream_type: &str, resolution: &str, index_file: &str) {
        let message = ControlMessage::StreamAvailable {
            channel: channel.to_string(),
            stream_id: stream_id.to_string(),
            stream_type: stream_type.to_string(),
            resolution: resolution.to_string(),
            index_file: index_file.to_string(),
            start_time: None,
        };
        self.send(message);
    }

    fn stream_closed(&self, channel: &str, stream_id: &str) {
        self.send(ControlMessage::StreamClosed { channel: channel.to_string(), stream_id: stream_id.to_string() });
    }
}

impl ControlClient {
    /// Builds the client and, if `CONTROL_BASE_URL` is configured, spawns
    /// the persistent dial-reconnect loop in the background.
    pub fn spawn(config: Arc<Config>, registry: Arc<TaskRegistry>) -> Arc<ControlClient> {
        let client = Arc::new(ControlClient { config, registry, outbox: Mutex::new(None) });

        if client.config.control_base_url.is_some() {
            let client = client.clone();
            tokio::spawn(async move { client.run().await });
        } else {
            tracing::warn!("CONTROL_BASE_URL unset; control client disabled, encoder will only serve its loopback sink");
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
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_once(self: &Arc<Self>) -> anyhow::Result<()> {
        let base = self.config.control_base_url.as_ref().expect("checked by caller in spawn");
        let url = format!("{}/ws/control/hls", base.trim_end_matches('/'));

        let secret = self.config.control_secret.clone().unwrap_or_default();
        let token = streaming_common::control_token::sign(ControlKind::Hls, &secret);

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

        // The coordinator may have lost track of this encoder across the
        // disconnect; terminate whatever we were doing before re-registering.
        self.registry.terminate_all();
        let _ = tx.send(ControlMessage::Register { capacity: self.config.server_capacity }.to_wire());

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
                Ok(message) => self.handle_inbound(message),
                Err(e) => tracing::warn!(error = %e, "malformed control message from coordinator"),
            }
        }

        heartbeat.abort();
        writer.abort();
        Ok(())
    }

    fn handle_inbound(self: &Arc<Self>, message: ControlMessage) {
        match message {
            ControlMessage::Heartbeat => {}
            ControlMessage::EncodeStart { channel, stream_id, source_type, source_uri, resolutions, record, previews } => {
                let events: Arc<dyn StreamEventSink> = self.clone();
                self.registry.start(
                    events,
                    channel,
                    stream_id,
                    source_type,
                    source_uri,
                    ResolutionList::decode(&resolutions),
                    record,
                    PreviewsConfig::decode(&previews),
                );
            }
            ControlMessage::EncodeStop { channel, stream_id } => {
                self.registry.stop(&channel, &stream_id);
            }
            other => tracing::debug!(message = ?other, "ignoring unexpected inbound control message"),
        }
    }

    fn send(&self, message: ControlMessage) {
        if let Some(tx) = self.outbox.lock().as_ref() {
            let _ = tx.send(message.to_wire());
        }
    }
}
