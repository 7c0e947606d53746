//! HTTP surface: the single WebSocket ingest endpoint
//! `/{channel}/{key}/{kind}` (§4.5, §6).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::session::PlayKind;
use crate::validation::is_valid_id;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(banner)).route("/{channel}/{key}/{kind}", get(ingest_upgrade)).with_state(state)
}

async fn banner() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}

fn parse_kind(segment: &str) -> Option<(bool, Option<PlayKind>)> {
    match segment {
        "publish" => Some((true, None)),
        "receive" => Some((false, Some(PlayKind::Receive))),
        "receive-clear-cache" => Some((false, Some(PlayKind::ReceiveClearCache))),
        "probe" => Some((false, Some(PlayKind::Probe))),
        _ => None,
    }
}

async fn ingest_upgrade(
    Path((channel, key, kind_segment)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    let Some((is_publish, play_kind)) = parse_kind(&kind_segment) else {
        return (StatusCode::NOT_FOUND, "unknown session kind").into_response();
    };

    if !is_valid_id(&channel, state.config.id_max_length) || !is_valid_id(&key, state.config.id_max_length) {
        return (StatusCode::BAD_REQUEST, "invalid channel or key").into_response();
    }

    let ip = addr.ip();
    let Some(ip_guard) = state.ip_limiter.admit(ip) else {
        return (StatusCode::TOO_MANY_REQUESTS, "too many concurrent connections from this IP").into_response();
    };

    if !is_publish {
        if let Some(whitelist) = &state.play_whitelist {
            if !whitelist.contains(ip) {
                return (StatusCode::FORBIDDEN, "IP not permitted to play").into_response();
            }
        }
    }

    if is_publish {
        let handle = state.registry.acquire(&channel);
        let occupied = handle.with_state(|s| s.publisher.is_some());
        state.registry.release(handle);
        if occupied {
            return (StatusCode::FORBIDDEN, "channel already has a publisher").into_response();
        }

        let outcome = state.control.publish_request(&channel, &key, &ip.to_string()).await;
        if !outcome.accepted {
            return (StatusCode::FORBIDDEN, "publish denied").into_response();
        }
        let stream_id = outcome.stream_id.unwrap_or_default();
        let session_id = state.next_session_id();

        return ws.on_upgrade(move |socket| async move {
            crate::session::run_publisher(state, socket, channel, key, session_id, stream_id, ip_guard).await;
        });
    }

    let kind = play_kind.expect("non-publish kinds always resolve a PlayKind");
    let gop_play_no = query.get("gop_play_no").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
    let session_id = state.next_session_id();

    ws.on_upgrade(move |socket| async move {
        crate::session::run_player(state, socket, channel, key, session_id, kind, gop_play_no, ip_guard).await;
    })
}
