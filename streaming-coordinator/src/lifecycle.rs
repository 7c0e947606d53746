//! Stream lifecycle glue (C9 + C11): turns an encoder's STREAM-AVAILABLE /
//! STREAM-CLOSED control messages into active-streams persistence and
//! outbound event-callback deliveries, and handles the two stream-teardown
//! paths that don't originate from the publish handshake — an operator- or
//! application-initiated STREAM-KILL, and cleanup after a control session
//! (ingest or encoder) disconnects unexpectedly.

use std::sync::Arc;
use tokio::sync::Notify;

use streaming_message::ControlMessage;

use crate::active_streams::{ActiveStream, ActiveStreamStore};
use crate::channel::{ChannelRegistry, EncoderId};
use crate::event::{EventDispatcher, EventPayload};
use crate::sessions::SessionRegistry;

pub struct Lifecycle {
    pub registry: Arc<ChannelRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub active_streams: Arc<ActiveStreamStore>,
    pub dispatcher: Arc<EventDispatcher>,
}

impl Lifecycle {
    /// Handles a STREAM-AVAILABLE control message received from an encoder.
    /// Always records the stream as active and launches (at least) one
    /// delivery attempt, per the at-least-once event-delivery invariant.
    pub fn on_stream_available(
        &self,
        channel_id: &str,
        stream_id: &str,
        stream_type: &str,
        resolution: &str,
        index_file: &str,
        start_time: Option<String>,
    ) {
        self.active_streams.insert(ActiveStream { channel: channel_id.to_string(), stream_id: stream_id.to_string() });

        let handle = self.registry.acquire(channel_id);
        handle.with_state(|s| {
            s.next_event_id += 1;
            let id = s.next_event_id;
            s.pending_events.insert(id, crate::channel::PendingEvent { stream_id: stream_id.to_string(), cancelled: false });
        });
        self.registry.release(handle);

        self.dispatcher.deliver(
            EventPayload::StreamAvailable {
                channel: channel_id.to_string(),
                stream_id: stream_id.to_string(),
                stream_type: stream_type.to_string(),
                resolution: resolution.to_string(),
                index_file: index_file.to_string(),
                start_time,
            },
            None,
        );
    }

    /// Handles a STREAM-CLOSED control message received from an encoder.
    /// Cancels any still-pending stream-available delivery for the *same*
    /// stream id (never a different stream that happens to share the
    /// channel), then launches the stream-closed delivery if one isn't
    /// already in flight. On eventual success, removes the stream from the
    /// persisted active-streams set.
    pub fn on_stream_closed(self: &Arc<Self>, channel_id: &str, stream_id: &str) {
        let entry = ActiveStream { channel: channel_id.to_string(), stream_id: stream_id.to_string() };
        if !self.active_streams.contains(&entry) {
            return;
        }

        let handle = self.registry.acquire(channel_id);
        handle.with_state(|s| {
            for pending in s.pending_events.values_mut() {
                if pending.stream_id == stream_id {
                    pending.cancelled = true;
                }
            }
        });
        self.registry.release(handle);
        self.dispatcher.cancel(channel_id, stream_id);

        if self.dispatcher.has_inflight(channel_id, stream_id) {
            return;
        }

        let notify = Arc::new(Notify::new());
        let lifecycle = self.clone();
        let entry_for_removal = entry.clone();
        tokio::spawn(async move {
            notify.notified().await;
            lifecycle.active_streams.remove(&entry_for_removal);
        });

        self.dispatcher.deliver(
            EventPayload::StreamClosed { channel: channel_id.to_string(), stream_id: stream_id.to_string() },
            Some(notify),
        );
    }

    /// Schedules a stream-closed delivery for an entry recovered from the
    /// persisted active-streams file at startup (§8 property 11 / S6).
    pub fn schedule_recovered(self: &Arc<Self>, entry: ActiveStream) {
        let notify = Arc::new(Notify::new());
        let lifecycle = self.clone();
        let entry_for_removal = entry.clone();
        tokio::spawn(async move {
            notify.notified().await;
            lifecycle.active_streams.remove(&entry_for_removal);
        });

        self.dispatcher.deliver(
            EventPayload::StreamClosed { channel: entry.channel, stream_id: entry.stream_id },
            Some(notify),
        );
    }

    /// Operator/application-initiated `STREAM-KILL` (`POST /commands/close`):
    /// forwards STREAM-KILL to the channel's publisher, if any. A no-op on
    /// an already-closed channel.
    pub fn kill_stream(&self, channel_id: &str) {
        let handle = self.registry.acquire(channel_id);
        let (closed, publisher, stream_id) = handle.with_state(|s| (s.closed, s.publisher_session_id, s.stream_id.clone()));
        self.registry.release(handle);

        if closed {
            return;
        }
        if let (Some(publisher_id), Some(stream_id)) = (publisher, stream_id) {
            let kill = ControlMessage::StreamKill { channel: channel_id.to_string(), stream_id };
            self.sessions.send(publisher_id, kill.to_wire());
        }
    }

    /// Cleanup after a control session (ingest or encoder) drops: for every
    /// channel the session was associated with, close it if it was the
    /// publisher (and tell the encoder to stop), or kill the publisher if
    /// it was the assigned encoder.
    pub fn on_session_disconnected(&self, session_id: u64) {
        for channel_id in self.sessions.channels_for(session_id) {
            let handle = self.registry.acquire(&channel_id);
            let (closed, publisher, encoder_session, stream_id) =
                handle.with_state(|s| (s.closed, s.publisher_session_id, s.encoder_session_id, s.stream_id.clone()));

            if !closed {
                if publisher == Some(session_id) {
                    handle.with_state(|s| {
                        s.closed = true;
                        s.publisher_session_id = None;
                        s.encoder_session_id = None;
                    });
                    if let (Some(encoder_id), Some(stream_id)) = (encoder_session, stream_id) {
                        let stop = ControlMessage::EncodeStop { channel: channel_id.clone(), stream_id };
                        self.sessions.send(encoder_id, stop.to_wire());
                        self.registry.release_encoder(EncoderId(encoder_id));
                    }
                } else if encoder_session == Some(session_id) {
                    if let (Some(publisher_id), Some(stream_id)) = (publisher, stream_id) {
                        let kill = ControlMessage::StreamKill { channel: channel_id.clone(), stream_id };
                        self.sessions.send(publisher_id, kill.to_wire());
                    }
                }
            }

            self.registry.release(handle);
        }

        self.sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PublishMethod;
    use crate::sessions::SessionKind;
    use tokio::sync::mpsc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn lifecycle(dispatcher: Arc<EventDispatcher>) -> Arc<Lifecycle> {
        let path = std::env::temp_dir().join(format!("lifecycle-test-{}.txt", rand::random::<u64>()));
        Arc::new(Lifecycle {
            registry: Arc::new(ChannelRegistry::new()),
            sessions: Arc::new(SessionRegistry::new()),
            active_streams: Arc::new(ActiveStreamStore::load(path).await.unwrap()),
            dispatcher,
        })
    }

    #[tokio::test]
    async fn stream_available_then_closed_removes_from_active_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let dispatcher = Arc::new(EventDispatcher::new(Some(server.uri()), None));
        let lifecycle = lifecycle(dispatcher).await;

        lifecycle.on_stream_available("ch1", "s1", "HLS-LIVE", "720x480-30", "hls/ch1/s1/720x480-30/live.m3u8", None);
        assert!(lifecycle.active_streams.contains(&ActiveStream { channel: "ch1".into(), stream_id: "s1".into() }));

        lifecycle.on_stream_closed("ch1", "s1");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!lifecycle.active_streams.contains(&ActiveStream { channel: "ch1".into(), stream_id: "s1".into() }));
    }

    #[tokio::test]
    async fn stream_closed_for_unknown_stream_is_a_noop() {
        let dispatcher = Arc::new(EventDispatcher::new(None, None));
        let lifecycle = lifecycle(dispatcher).await;
        lifecycle.on_stream_closed("ch1", "never-available");
    }

    #[tokio::test]
    async fn disconnecting_publisher_stops_the_encoder_and_closes_the_channel() {
        let dispatcher = Arc::new(EventDispatcher::new(None, None));
        let lifecycle = lifecycle(dispatcher).await;

        let (pub_tx, _pub_rx) = mpsc::unbounded_channel();
        let (enc_tx, mut enc_rx) = mpsc::unbounded_channel();
        let pub_id = lifecycle.sessions.insert(SessionKind::Wss, pub_tx, None, None);
        let enc_id = lifecycle.sessions.insert(SessionKind::Hls, enc_tx, None, None);

        let handle = lifecycle.registry.acquire("ch1");
        handle.with_state(|s| {
            s.closed = false;
            s.publisher_session_id = Some(pub_id);
            s.encoder_session_id = Some(enc_id);
            s.publish_method = Some(PublishMethod::Ws);
            s.stream_id = Some("s1".to_string());
        });
        lifecycle.registry.release(handle);
        lifecycle.sessions.associate_channel(pub_id, "ch1");

        lifecycle.on_session_disconnected(pub_id);

        let msg = enc_rx.try_recv().unwrap();
        assert!(msg.starts_with("ENCODE-STOP"));

        let handle = lifecycle.registry.acquire("ch1");
        assert!(handle.with_state(|s| s.closed));
        lifecycle.registry.release(handle);
    }

    #[tokio::test]
    async fn disconnecting_encoder_kills_the_publisher() {
        let dispatcher = Arc::new(EventDispatcher::new(None, None));
        let lifecycle = lifecycle(dispatcher).await;

        let (pub_tx, mut pub_rx) = mpsc::unbounded_channel();
        let (enc_tx, _enc_rx) = mpsc::unbounded_channel();
        let pub_id = lifecycle.sessions.insert(SessionKind::Wss, pub_tx, None, None);
        let enc_id = lifecycle.sessions.insert(SessionKind::Hls, enc_tx, None, None);

        let handle = lifecycle.registry.acquire("ch1");
        handle.with_state(|s| {
            s.closed = false;
            s.publisher_session_id = Some(pub_id);
            s.encoder_session_id = Some(enc_id);
            s.stream_id = Some("s1".to_string());
        });
        lifecycle.registry.release(handle);
        lifecycle.sessions.associate_channel(enc_id, "ch1");

        lifecycle.on_session_disconnected(enc_id);

        let msg = pub_rx.try_recv().unwrap();
        assert!(msg.starts_with("STREAM-KILL"));
    }
}
