//! CDN fan-out publisher (C12): an optional, per-rendition outbound WS push
//! of HLS fragments to one of a configured pool of push endpoints.
//!
//! Server selection mirrors the "lowest-recent-failure then random among
//! healthy" pool strategy; the connect/heartbeat/reconnect shape mirrors
//! `control_client.rs`'s dial loop, scaled down to the push protocol's own
//! handshake (`PUSH` + signed token, `F duration=...` + binary body pairs,
//! `H` heartbeat, 1s backoff instead of 10s since a CDN push is best-effort
//! and losing a few seconds of fan-out is cheaper than losing control-plane
//! connectivity).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as TMessage;

const UNHEALTHY_WINDOW: Duration = Duration::from_secs(10);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Fragments buffered while disconnected; oldest dropped past this, since a
/// CDN edge that's been down long enough to fill this has already missed
/// more live fragments than it's worth replaying.
const BACKLOG_CAP: usize = 32;

#[derive(Serialize)]
struct PushClaims {
    sub: String,
}

fn sign_push_token(stream_id: &str, secret: &[u8]) -> String {
    let claims = PushClaims { sub: stream_id.to_string() };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .expect("HS256 encoding of a one-field claim set never fails")
}

struct PoolServer {
    url: String,
    last_failure: Option<Instant>,
}

/// Picks the index of the server to try next: minimum most-recent-failure
/// among those not marked unhealthy (failed within `UNHEALTHY_WINDOW`),
/// random tie-break; falls back to the whole pool if every server is
/// currently unhealthy.
fn select_server(pool: &[PoolServer], now: Instant) -> usize {
    let healthy: Vec<usize> = (0..pool.len())
        .filter(|&i| pool[i].last_failure.map(|f| now.duration_since(f) > UNHEALTHY_WINDOW).unwrap_or(true))
        .collect();
    let candidates = if healthy.is_empty() { (0..pool.len()).collect::<Vec<_>>() } else { healthy };

    let min_failure = candidates.iter().map(|&i| pool[i].last_failure).min_by(|a, b| match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    });

    let tied: Vec<usize> = candidates.iter().copied().filter(|&i| pool[i].last_failure == min_failure).collect();
    tied[rand::thread_rng().gen_range(0..tied.len())]
}

enum PushItem {
    Fragment { duration: f64, body: Bytes },
}

/// One outbound push connection for a single rendition of a single stream.
pub struct CdnPublisher {
    tx: mpsc::UnboundedSender<PushItem>,
}

impl CdnPublisher {
    pub fn spawn(pool_urls: Vec<String>, secret: Vec<u8>, stream_id: String) -> Arc<CdnPublisher> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(pool_urls, secret, stream_id, rx));
        Arc::new(CdnPublisher { tx })
    }

    pub fn push(&self, duration: f64, body: Bytes) {
        let _ = self.tx.send(PushItem::Fragment { duration, body });
    }
}

async fn run(pool_urls: Vec<String>, secret: Vec<u8>, stream_id: String, mut rx: mpsc::UnboundedReceiver<PushItem>) {
    if pool_urls.is_empty() {
        return;
    }
    let pool = Mutex::new(pool_urls.into_iter().map(|url| PoolServer { url, last_failure: None }).collect::<Vec<_>>());
    let mut backlog: VecDeque<PushItem> = VecDeque::new();

    loop {
        let idx = select_server(&pool.lock(), Instant::now());
        let url = pool.lock()[idx].url.clone();

        match push_once(&url, &secret, &stream_id, &mut backlog, &mut rx).await {
            Ok(()) => return, // sender dropped; task channel closed cleanly
            Err(e) => {
                tracing::warn!(url, stream_id, error = %e, "CDN push connection failed");
                pool.lock()[idx].last_failure = Some(Instant::now());
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

async fn push_once(
    url: &str,
    secret: &[u8],
    stream_id: &str,
    backlog: &mut VecDeque<PushItem>,
    rx: &mut mpsc::UnboundedReceiver<PushItem>,
) -> anyhow::Result<()> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let token = sign_push_token(stream_id, secret);
    sink.send(TMessage::Text(format!("PUSH {stream_id} {token}").into())).await?;

    let ack = tokio::time::timeout(Duration::from_secs(20), stream.next()).await?;
    match ack {
        Some(Ok(TMessage::Text(text))) if text.trim() == "OK" => {}
        Some(Ok(_)) => anyhow::bail!("unexpected response to PUSH handshake"),
        Some(Err(e)) => return Err(e.into()),
        None => anyhow::bail!("connection closed during PUSH handshake"),
    }

    while let Some(item) = backlog.pop_front() {
        send_fragment(&mut sink, item).await?;
    }

    let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sink.send(TMessage::Text("H".into())).await?;
            }
            item = rx.recv() => {
                match item {
                    Some(item) => send_fragment(&mut sink, item).await?,
                    None => {
                        let _ = sink.send(TMessage::Close(None)).await;
                        return Ok(());
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(TMessage::Close(_))) | None => anyhow::bail!("CDN edge closed the push connection"),
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }
        }
    }
}

async fn send_fragment<S>(sink: &mut S, item: PushItem) -> anyhow::Result<()>
where
    S: futures_util::Sink<TMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let PushItem::Fragment { duration, body } = item;
    sink.send(TMessage::Text(format!("F duration={duration}").into())).await?;
    sink.send(TMessage::Binary(body.to_vec().into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(failed_secs_ago: Option<u64>, now: Instant) -> PoolServer {
        PoolServer { url: "x".to_string(), last_failure: failed_secs_ago.map(|s| now - Duration::from_secs(s)) }
    }

    #[test]
    fn prefers_server_with_no_recorded_failure() {
        let now = Instant::now();
        let pool = vec![server(Some(2), now), server(None, now)];
        assert_eq!(select_server(&pool, now), 1);
    }

    #[test]
    fn treats_old_failures_as_healthy_again() {
        let now = Instant::now();
        let pool = vec![server(Some(20), now), server(Some(1), now)];
        // index 0 failed 20s ago (outside the 10s window, healthy); index 1
        // failed 1s ago (unhealthy). Only 0 is a candidate.
        assert_eq!(select_server(&pool, now), 0);
    }

    #[test]
    fn falls_back_to_whole_pool_when_all_unhealthy() {
        let now = Instant::now();
        let pool = vec![server(Some(1), now), server(Some(2), now)];
        // Both unhealthy; minimum-recent-failure among all is index 0 (least
        // recently failed survives as the only tie).
        assert_eq!(select_server(&pool, now), 0);
    }

    #[test]
    fn push_token_carries_stream_id_as_subject() {
        let token = sign_push_token("stream-1", b"secret");
        let decoded = jsonwebtoken::decode::<PushClaims>(
            &token,
            &jsonwebtoken::DecodingKey::from_secret(b"secret"),
            &jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "stream-1");
    }
}
