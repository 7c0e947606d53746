//! Event delivery (C11): outbound stream-available/stream-closed callbacks
//! to the application backend, with retry and cancellation.
//!
//! Cancellation is scoped to the stream-id: a stream-closed for stream S
//! cancels only S's own still-pending stream-available delivery, never an
//! unrelated pending delivery for a previous stream that happened to share
//! the same channel.

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use streaming_common::http_auth::AuthScheme;

const RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum EventPayload {
    StreamAvailable {
        channel: String,
        stream_id: String,
        stream_type: String,
        resolution: String,
        index_file: String,
        start_time: Option<String>,
    },
    StreamClosed {
        channel: String,
        stream_id: String,
    },
}

impl EventPayload {
    fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            EventPayload::StreamAvailable { channel, stream_id, stream_type, resolution, index_file, start_time } => {
                let mut headers = vec![
                    ("x-event-type", "stream-available".to_string()),
                    ("x-streaming-channel", channel.clone()),
                    ("x-streaming-id", stream_id.clone()),
                    ("x-stream-type", stream_type.clone()),
                    ("x-resolution", resolution.clone()),
                    ("x-index-file", index_file.clone()),
                ];
                if let Some(start_time) = start_time {
                    headers.push(("x-start-time", start_time.clone()));
                }
                headers
            }
            EventPayload::StreamClosed { channel, stream_id } => {
                vec![
                    ("x-event-type", "stream-closed".to_string()),
                    ("x-streaming-channel", channel.clone()),
                    ("x-streaming-id", stream_id.clone()),
                ]
            }
        }
    }

    fn stream_key(&self) -> (String, String) {
        match self {
            EventPayload::StreamAvailable { channel, stream_id, .. } => (channel.clone(), stream_id.clone()),
            EventPayload::StreamClosed { channel, stream_id } => (channel.clone(), stream_id.clone()),
        }
    }
}

/// Dispatches event callbacks and tracks in-flight deliveries so a
/// stream-closed can cancel a same-stream pending stream-available.
pub struct EventDispatcher {
    client: Client,
    url: Option<String>,
    auth: Option<AuthScheme>,
    inflight: std::sync::Mutex<HashMap<(String, String), CancellationToken>>,
}

impl EventDispatcher {
    pub fn new(url: Option<String>, auth: Option<AuthScheme>) -> Self {
        EventDispatcher { client: Client::new(), url, auth, inflight: std::sync::Mutex::new(HashMap::new()) }
    }

    /// Whether a delivery is currently in flight for `{channel, streamId}`.
    pub fn has_inflight(&self, channel: &str, stream_id: &str) -> bool {
        self.inflight.lock().unwrap().contains_key(&(channel.to_string(), stream_id.to_string()))
    }

    /// Cancels any pending delivery for the given `{channel, streamId}`.
    pub fn cancel(&self, channel: &str, stream_id: &str) {
        if let Some(token) = self.inflight.lock().unwrap().remove(&(channel.to_string(), stream_id.to_string())) {
            token.cancel();
        }
    }

    /// Launches delivery of `payload` in the background. Retries every 10s
    /// on transport error or non-200 status until it succeeds or is
    /// cancelled via [`cancel`](Self::cancel) for the same stream.
    pub fn deliver(self: &Arc<Self>, payload: EventPayload, on_success: Option<Arc<Notify>>) {
        let Some(url) = self.url.clone() else {
            tracing::warn!(stream_key = ?payload.stream_key(), "EVENT_CALLBACK_URL unset; treating event as already delivered");
            if let Some(notify) = on_success {
                notify.notify_one();
            }
            return;
        };

        let key = payload.stream_key();
        let token = CancellationToken::new();
        self.inflight.lock().unwrap().insert(key.clone(), token.clone());

        let dispatcher = self.clone();
        tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    break;
                }

                let mut request = dispatcher.client.post(&url);
                for (name, value) in payload.headers() {
                    request = request.header(name, value);
                }
                if let Some(auth) = &dispatcher.auth {
                    request = apply_auth(request, auth);
                }

                let outcome = tokio::select! {
                    result = request.send() => result,
                    () = token.cancelled() => break,
                };

                match outcome {
                    Ok(response) if response.status().is_success() => break,
                    _ => {
                        tokio::select! {
                            () = tokio::time::sleep(RETRY_DELAY) => {}
                            () = token.cancelled() => break,
                        }
                    }
                }
            }

            dispatcher.inflight.lock().unwrap().remove(&key);
            if !token.is_cancelled() {
                if let Some(notify) = on_success {
                    notify.notify_one();
                }
            }
        });
    }
}

fn apply_auth(request: reqwest::RequestBuilder, auth: &AuthScheme) -> reqwest::RequestBuilder {
    match auth {
        AuthScheme::Basic { username, password } => request.basic_auth(username, Some(password)),
        AuthScheme::Bearer { token } => request.bearer_auth(token),
        AuthScheme::Custom { expected_value } => request.header("Authorization", expected_value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn delivers_once_on_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-event-type", "stream-closed"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Arc::new(EventDispatcher::new(Some(server.uri()), None));
        let notify = Arc::new(Notify::new());
        dispatcher.deliver(
            EventPayload::StreamClosed { channel: "ch1".to_string(), stream_id: "s1".to_string() },
            Some(notify.clone()),
        );

        tokio::time::timeout(Duration::from_secs(2), notify.notified()).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_retry_without_delivering() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let dispatcher = Arc::new(EventDispatcher::new(Some(server.uri()), None));
        dispatcher.deliver(
            EventPayload::StreamAvailable {
                channel: "ch1".to_string(),
                stream_id: "s1".to_string(),
                stream_type: "HLS-LIVE".to_string(),
                resolution: "720x480-30".to_string(),
                index_file: "hls/ch1/s1/720x480-30/live.m3u8".to_string(),
                start_time: None,
            },
            None,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher.cancel("ch1", "s1");
        assert!(dispatcher.inflight.lock().unwrap().is_empty());
    }
}
