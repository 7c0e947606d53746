//! HTTP surface: the control-plane WebSocket upgrade endpoint and the small
//! commands API (§6) used by operators and the application backend.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use streaming_common::control_token::ControlKind;
use streaming_message::ControlMessage;

use crate::channel::EncoderId;
use crate::sessions::{IngestRegistration, SessionKind};
use crate::AppState;

const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/ws/control/{kind}", get(control_upgrade))
        .route("/commands/close", post(commands_close))
        .route("/commands/capacity", get(commands_capacity))
        .route("/commands/report", get(commands_report))
        .with_state(state)
}

async fn banner() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}

fn control_kind_for_path(segment: &str) -> Option<(SessionKind, ControlKind)> {
    match segment {
        "rtmp" => Some((SessionKind::Rtmp, ControlKind::Rtmp)),
        "wss" => Some((SessionKind::Wss, ControlKind::Wss)),
        "hls" => Some((SessionKind::Hls, ControlKind::Hls)),
        _ => None,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

async fn control_upgrade(
    Path(kind_segment): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    let Some((session_kind, expected_kind)) = control_kind_for_path(&kind_segment) else {
        return (StatusCode::NOT_FOUND, "unknown control connection kind").into_response();
    };

    let Some(token) = header_str(&headers, "x-control-auth-token") else {
        return (StatusCode::UNAUTHORIZED, "missing x-control-auth-token").into_response();
    };
    let secret = state.config.control_secret.as_deref();
    match streaming_common::control_token::verify(token, secret) {
        Ok(kind) if kind == expected_kind => {}
        _ => return (StatusCode::UNAUTHORIZED, "invalid control token").into_response(),
    }

    let ingest = if session_kind != SessionKind::Hls {
        let external_ip = header_str(&headers, "x-external-ip").unwrap_or_default().to_string();
        let external_port: u16 = header_str(&headers, "x-custom-port").and_then(|v| v.parse().ok()).unwrap_or(0);
        let ssl = header_str(&headers, "x-ssl-use").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
        Some(IngestRegistration { external_ip, external_port, ssl })
    } else {
        None
    };

    ws.on_upgrade(move |socket| handle_control_socket(socket, state, session_kind, ingest))
}

async fn handle_control_socket(socket: WebSocket, state: AppState, kind: SessionKind, ingest: Option<IngestRegistration>) {
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    let session_id = state.sessions.insert(kind, outbox_tx, ingest, None);
    tracing::info!(session_id, ?kind, "control session connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let next = tokio::time::timeout(READ_TIMEOUT, stream.next()).await;
        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                tracing::warn!(session_id, error = %e, "control session read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(session_id, "control session heartbeat timed out");
                break;
            }
        };

        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        match ControlMessage::from_wire(&text) {
            Ok(message) => handle_control_message(&state, session_id, kind, message).await,
            Err(e) => tracing::warn!(session_id, error = %e, "malformed control message"),
        }
    }

    writer.abort();
    if kind == SessionKind::Hls {
        state.registry.deregister_encoder(EncoderId(session_id));
    }
    state.lifecycle.on_session_disconnected(session_id);
    tracing::info!(session_id, "control session disconnected");
}

async fn handle_control_message(state: &AppState, session_id: u64, kind: SessionKind, message: ControlMessage) {
    match message {
        ControlMessage::Heartbeat => {}
        ControlMessage::Register { capacity } if kind == SessionKind::Hls => {
            state.registry.register_encoder(EncoderId(session_id), capacity);
        }
        ControlMessage::PublishRequest { request_id, channel, key, user_ip } => {
            let outcome = state.handshake.publish_request(session_id, &channel, &key, &user_ip).await;
            let reply = if let (true, Some(stream_id)) = (outcome.accepted, outcome.stream_id) {
                state.sessions.associate_channel(session_id, &channel);
                ControlMessage::PublishAccept { request_id, channel, stream_id }
            } else {
                ControlMessage::PublishDeny { request_id, channel }
            };
            state.sessions.send(session_id, reply.to_wire());
        }
        ControlMessage::PublishEnd { channel, .. } => {
            state.handshake.publish_end(&channel).await;
            state.sessions.disassociate_channel(session_id, &channel);
        }
        ControlMessage::StreamAvailable { channel, stream_id, stream_type, resolution, index_file, start_time } => {
            state.sessions.associate_channel(session_id, &channel);
            state.lifecycle.on_stream_available(&channel, &stream_id, &stream_type, &resolution, &index_file, start_time);
        }
        ControlMessage::StreamClosed { channel, stream_id } => {
            state.lifecycle.on_stream_closed(&channel, &stream_id);
        }
        other => {
            tracing::debug!(session_id, ?kind, message = ?other, "ignoring coordinator-outbound-only message received inbound");
        }
    }
}

fn check_commands_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(scheme) = &state.config.commands_auth else {
        return Ok(());
    };
    let Some(value) = header_str(headers, "authorization") else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if streaming_common::check_authorization(value, scheme) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn commands_close(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(status) = check_commands_auth(&state, &headers) {
        return status.into_response();
    }
    let Some(channel) = header_str(&headers, "x-streaming-channel") else {
        return (StatusCode::BAD_REQUEST, "missing x-streaming-channel").into_response();
    };
    state.lifecycle.kill_stream(channel);
    StatusCode::NO_CONTENT.into_response()
}

async fn commands_capacity(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(status) = check_commands_auth(&state, &headers) {
        return status.into_response();
    }
    let (load, capacity, encoders) = state.registry.capacity_report();
    Json(json!({ "load": load, "capacity": capacity, "encoders": encoders })).into_response()
}

async fn commands_report(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(status) = check_commands_auth(&state, &headers) {
        return status.into_response();
    }

    let streaming_servers: Vec<_> = state
        .sessions
        .list_ingest()
        .into_iter()
        .map(|(id, kind, ip, port, ssl)| {
            let kind_label = match kind {
                SessionKind::Rtmp => "rtmp",
                SessionKind::Wss => "wss",
                SessionKind::Hls => "hls",
            };
            json!({ "sessionId": id, "kind": kind_label, "externalIp": ip, "externalPort": port, "ssl": ssl })
        })
        .collect();

    let encoders: Vec<_> = state
        .registry
        .list_encoders()
        .into_iter()
        .map(|(id, capacity, load)| json!({ "encoderId": id.0, "capacity": capacity, "load": load }))
        .collect();

    let active_streams: Vec<_> = state
        .lifecycle
        .active_streams
        .snapshot()
        .into_iter()
        .map(|entry| json!({ "channel": entry.channel, "streamId": entry.stream_id }))
        .collect();

    Json(json!({ "streamingServers": streaming_servers, "encoders": encoders, "activeStreams": active_streams })).into_response()
}
