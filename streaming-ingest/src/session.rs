//! Ingest session engine (C7): publisher and player WebSocket sessions,
//! GOP-cache fan-out, idle promotion, and bitrate accounting.
//!
//! Grounded on `original_source/ws-stream-server/session.go` (`Run`'s 60s
//! read deadline and 20s text heartbeats, the PUBLISHING/PLAYING/IDLING/
//! PROBING state names) and `session_publisher.go` (`StartPlayer`,
//! `StartIdlePlayers`'s constant-time key check, `HandleChunk`'s
//! cache-then-fan-out order, `EndPublish`'s idle-not-disconnect semantics
//! for already-connected players).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelState, Frame, Outbox, PlayerHandle, PlayerState, PublisherHandle};
use crate::gop_cache::GopCache;
use crate::ip_limit::IpAdmission;
use crate::AppState;

const READ_TIMEOUT: Duration = Duration::from_secs(60);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayKind {
    Receive,
    ReceiveClearCache,
    Probe,
}

fn spawn_writer(mut sink: SplitSink<WebSocket, WsMessage>, mut rx: mpsc::UnboundedReceiver<Frame>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let msg = match frame {
                Frame::Text(t) => WsMessage::Text(t.into()),
                Frame::Binary(b) => WsMessage::Binary(b),
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    })
}

/// Forwards frames until the first binary chunk is delivered, then closes
/// the socket — the probe contract.
async fn run_probe_writer(mut sink: SplitSink<WebSocket, WsMessage>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Text(t) => {
                if sink.send(WsMessage::Text(t.into())).await.is_err() {
                    break;
                }
            }
            Frame::Binary(b) => {
                let _ = sink.send(WsMessage::Binary(b)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

fn spawn_heartbeat(outbox: Outbox) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if outbox.send(Frame::Text("h".to_string())).is_err() {
                break;
            }
        }
    })
}

struct BitrateTracker {
    window_start: Instant,
    window_bytes: usize,
}

impl BitrateTracker {
    fn new() -> Self {
        BitrateTracker { window_start: Instant::now(), window_bytes: 0 }
    }

    /// Diagnostic only: logs a rolling bits/ms estimate every ~1s. Never
    /// gates any admission or fan-out decision.
    fn record(&mut self, bytes: usize) {
        self.window_bytes += bytes;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let bits_per_ms = (self.window_bytes as f64 * 8.0) / elapsed.as_millis().max(1) as f64;
            tracing::trace!(bits_per_ms, "publisher bitrate");
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
    }
}

/// Runs a publisher session to completion: registers as the channel's
/// publisher, promotes matching idle players, fans out every inbound
/// chunk, and performs `EndPublish` cleanup on exit.
pub async fn run_publisher(
    state: Arc<AppState>,
    socket: WebSocket,
    channel: String,
    key: String,
    session_id: u64,
    stream_id: String,
    _ip_guard: IpAdmission,
) {
    let (sink, mut stream) = socket.split();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<Frame>();
    let writer = spawn_writer(sink, outbox_rx);
    let heartbeat = spawn_heartbeat(outbox_tx.clone());
    let kill = CancellationToken::new();

    {
        let handle = state.registry.acquire(&channel);
        handle.with_state(|s| {
            s.publisher = Some(PublisherHandle {
                session_id,
                key: key.clone(),
                stream_id: stream_id.clone(),
                gop_cache: GopCache::new(state.config.gop_cache_size_bytes),
                kill: kill.clone(),
            });
            promote_idling_players(s, &key);
        });
        state.registry.release(handle);
    }

    let mut bitrate = BitrateTracker::new();

    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(READ_TIMEOUT, stream.next()) => next,
            () = kill.cancelled() => break,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            _ => break,
        };

        match frame {
            WsMessage::Binary(data) => {
                bitrate.record(data.len());
                fan_out_chunk(&state, &channel, data.into());
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    heartbeat.abort();
    end_publish(&state, &channel, session_id, &stream_id).await;
}

/// Compares `publish_key` against every IDLING player's key in constant
/// time; matches are promoted to PLAYING and flushed the GOP cache (a
/// one-shot snapshot taken once up front, not re-read per player), others
/// are errored and killed.
fn promote_idling_players(s: &mut ChannelState, publish_key: &str) {
    let cache_snapshot = s.publisher.as_ref().map(|p| p.gop_cache.snapshot()).unwrap_or_default();
    let mut disable_cache = false;

    for player in s.players.values_mut().filter(|p| p.state == PlayerState::Idling) {
        let matches: bool = player.key.as_bytes().ct_eq(publish_key.as_bytes()).into();
        if matches {
            if !player.gop_play_no {
                for chunk in &cache_snapshot {
                    let _ = player.outbox.send(Frame::Binary(chunk.clone()));
                }
            }
            player.state = PlayerState::Playing;
            if player.clear_cache_on_play {
                disable_cache = true;
            }
        } else {
            let _ = player.outbox.send(Frame::Text("ERROR: Invalid streaming key".to_string()));
            player.kill.cancel();
        }
    }

    if disable_cache {
        if let Some(publisher) = &mut s.publisher {
            publisher.gop_cache.disable();
        }
    }
}

fn fan_out_chunk(state: &AppState, channel: &str, data: Bytes) {
    let handle = state.registry.acquire(channel);
    handle.with_state(|s| {
        if let Some(publisher) = &mut s.publisher {
            publisher.gop_cache.push(data.clone());
        }
        for player in s.players.values().filter(|p| p.state == PlayerState::Playing) {
            let _ = player.outbox.send(Frame::Binary(data.clone()));
        }
    });
    state.registry.release(handle);
}

/// PUBLISH-END: if this session is still the channel's recorded
/// publisher, clears it and sends every connected player back to IDLING
/// (the GOP cache itself is dropped along with the publisher entry)
/// rather than disconnecting them — a player's socket outlives any single
/// publish. Then notifies the coordinator.
async fn end_publish(state: &AppState, channel: &str, session_id: u64, stream_id: &str) {
    let handle = state.registry.acquire(channel);
    let was_publisher = handle.with_state(|s| {
        let matches = s.publisher.as_ref().map(|p| p.session_id) == Some(session_id);
        if matches {
            s.publisher = None;
            for player in s.players.values_mut() {
                player.state = PlayerState::Idling;
            }
        }
        matches
    });
    state.registry.release(handle);

    if was_publisher {
        state.control.publish_end(channel, stream_id);
    }
}

fn register_player(
    s: &mut ChannelState,
    session_id: u64,
    key: &str,
    kind: PlayKind,
    gop_play_no: bool,
    clear_cache_on_play: bool,
    outbox: Outbox,
    kill: CancellationToken,
) -> Result<Vec<Bytes>, ()> {
    match &mut s.publisher {
        Some(publisher) => {
            let matches: bool = publisher.key.as_bytes().ct_eq(key.as_bytes()).into();
            if !matches {
                return Err(());
            }
            let flush = if gop_play_no { Vec::new() } else { publisher.gop_cache.snapshot() };
            if clear_cache_on_play {
                publisher.gop_cache.disable();
            }
            s.players.insert(
                session_id,
                PlayerHandle { outbox, key: key.to_string(), state: PlayerState::Playing, gop_play_no, clear_cache_on_play, kill },
            );
            Ok(flush)
        }
        None => {
            if kind == PlayKind::Probe {
                return Err(());
            }
            s.players.insert(
                session_id,
                PlayerHandle { outbox, key: key.to_string(), state: PlayerState::Idling, gop_play_no, clear_cache_on_play, kill },
            );
            Ok(Vec::new())
        }
    }
}

/// Runs a player (`receive`/`receive-clear-cache`/`probe`) session to
/// completion.
pub async fn run_player(
    state: Arc<AppState>,
    socket: WebSocket,
    channel: String,
    key: String,
    session_id: u64,
    kind: PlayKind,
    gop_play_no: bool,
    _ip_guard: IpAdmission,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<Frame>();
    let kill = CancellationToken::new();
    let clear_cache_on_play = kind == PlayKind::ReceiveClearCache;

    let handle = state.registry.acquire(&channel);
    let decision = handle.with_state(|s| {
        register_player(s, session_id, &key, kind, gop_play_no, clear_cache_on_play, outbox_tx.clone(), kill.clone())
    });
    state.registry.release(handle);

    let flush = match decision {
        Ok(flush) => flush,
        Err(()) => {
            let _ = sink.send(WsMessage::Text("ERROR: Invalid streaming key".to_string().into())).await;
            let _ = sink.close().await;
            return;
        }
    };
    for chunk in flush {
        let _ = outbox_tx.send(Frame::Binary(chunk));
    }

    if kind == PlayKind::Probe {
        run_probe_writer(sink, outbox_rx).await;
    } else {
        let writer = spawn_writer(sink, outbox_rx);
        let heartbeat = spawn_heartbeat(outbox_tx.clone());

        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(READ_TIMEOUT, stream.next()) => next,
                () = kill.cancelled() => break,
            };
            match next {
                Ok(Some(Ok(frame))) => {
                    if matches!(frame, WsMessage::Close(_)) {
                        break;
                    }
                }
                _ => break,
            }
        }

        writer.abort();
        heartbeat.abort();
    }

    let handle = state.registry.acquire(&channel);
    handle.with_state(|s| {
        s.players.remove(&session_id);
    });
    state.registry.release(handle);
}
