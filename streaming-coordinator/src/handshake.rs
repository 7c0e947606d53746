//! Publish handshake (§4.3): PUBLISH-REQUEST → key verification → stream-id
//! mint → channel acquire → encoder assignment → ENCODE-START → channel
//! release → PUBLISH-ACCEPT/DENY.

use std::sync::Arc;

use streaming_hls::{PreviewsConfig, ResolutionList};
use streaming_message::ControlMessage;

use crate::channel::{ChannelRegistry, EncoderId, PublishMethod};
use crate::key_verification::KeyVerificationClient;
use crate::sessions::{SessionKind, SessionRegistry};
use crate::validation::is_valid_id;

pub struct PublishOutcome {
    pub accepted: bool,
    pub stream_id: Option<String>,
}

pub struct Handshake {
    pub registry: Arc<ChannelRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub key_verification: Arc<KeyVerificationClient>,
    pub id_max_length: usize,
}

impl Handshake {
    /// Drives the publish handshake for a PUBLISH-REQUEST received on
    /// `publisher_session_id`. Returns the outcome so the caller can send
    /// PUBLISH-ACCEPT or PUBLISH-DENY back to the publisher.
    pub async fn publish_request(
        &self,
        publisher_session_id: u64,
        channel_id: &str,
        key: &str,
        user_ip: &str,
    ) -> PublishOutcome {
        if !is_valid_id(channel_id, self.id_max_length) || !is_valid_id(key, self.id_max_length) {
            return PublishOutcome { accepted: false, stream_id: None };
        }

        let Ok(Some(grant)) = self.key_verification.verify(channel_id, key, user_ip).await else {
            return PublishOutcome { accepted: false, stream_id: None };
        };

        let stream_id = self.registry.mint_stream_id();
        let handle = self.registry.acquire(channel_id);

        let already_open = handle.with_state(|s| !s.closed);
        if already_open {
            self.registry.release(handle);
            return PublishOutcome { accepted: false, stream_id: None };
        }

        let (kind, ext_ip, ext_port, ssl) = self.sessions.ingest_uri_base(publisher_session_id).unwrap_or((SessionKind::Wss, String::new(), 0, false));
        let publish_method = if kind == SessionKind::Rtmp { PublishMethod::Rtmp } else { PublishMethod::Ws };

        handle.with_state(|s| {
            s.closed = false;
            s.publisher_session_id = Some(publisher_session_id);
            s.publish_method = Some(publish_method);
            s.stream_id = Some(stream_id.clone());
        });

        let Some(encoder_id) = self.registry.assign_available_encoder() else {
            handle.with_state(|s| *s = crate::channel::ChannelState::new_closed());
            self.registry.release(handle);
            return PublishOutcome { accepted: false, stream_id: None };
        };

        let source_uri = build_source_uri(publish_method, ssl, &ext_ip, ext_port, channel_id, key);
        handle.with_state(|s| s.encoder_session_id = Some(encoder_id.0));

        let encode_start = ControlMessage::EncodeStart {
            channel: channel_id.to_string(),
            stream_id: stream_id.clone(),
            source_type: source_type_label(publish_method).to_string(),
            source_uri,
            resolutions: encode_resolutions(&grant.resolutions),
            record: grant.record,
            previews: encode_previews(&grant.previews),
        };
        self.sessions.send(encoder_id.0, encode_start.to_wire());

        self.registry.release(handle);
        PublishOutcome { accepted: true, stream_id: Some(stream_id) }
    }

    /// PUBLISH-END: closes the channel, notifies the encoder, and releases
    /// the encoder's load slot.
    pub async fn publish_end(&self, channel_id: &str) {
        let handle = self.registry.acquire(channel_id);
        let (already_closed, encoder_session_id, stream_id) =
            handle.with_state(|s| (s.closed, s.encoder_session_id, s.stream_id.clone()));

        if already_closed {
            self.registry.release(handle);
            return;
        }

        if let (Some(session_id), Some(stream_id)) = (encoder_session_id, &stream_id) {
            let stop = ControlMessage::EncodeStop { channel: channel_id.to_string(), stream_id: stream_id.clone() };
            self.sessions.send(session_id, stop.to_wire());
            self.registry.release_encoder(EncoderId(session_id));
        }

        handle.with_state(|s| {
            s.closed = true;
            s.publisher_session_id = None;
            s.encoder_session_id = None;
        });
        self.registry.release(handle);
    }
}

fn source_type_label(method: PublishMethod) -> &'static str {
    match method {
        PublishMethod::Rtmp => "RTMP",
        PublishMethod::Ws => "WS",
    }
}

fn build_source_uri(method: PublishMethod, ssl: bool, ip: &str, port: u16, channel: &str, key: &str) -> String {
    let scheme = match (method, ssl) {
        (PublishMethod::Rtmp, false) => "rtmp",
        (PublishMethod::Rtmp, true) => "rtmps",
        (PublishMethod::Ws, false) => "ws",
        (PublishMethod::Ws, true) => "wss",
    };
    format!("{scheme}://{ip}:{port}/{channel}/{key}")
}

fn encode_resolutions(list: &ResolutionList) -> String {
    list.encode()
}

fn encode_previews(previews: &PreviewsConfig) -> String {
    previews.encode()
}
