//! Loopback HTTP sink the transcoder subprocesses PUT into (§4.6).
//!
//! Accepts `/hls/{channel}/{stream}/{resolution}/{file}` and
//! `/img-preview/{channel}/{stream}/{resolution}/{file}`; routes by the
//! file extension to the matching `EncodingTask`'s handler, writing the
//! body to storage first for `.ts`/`.jpg` bodies (the `.m3u8` rewrite
//! itself is not persisted verbatim — the task re-encodes its own live/VOD
//! view and persists that instead).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;
use bytes::Bytes;

use crate::task::{fragment_path, preview_path, TaskRegistry};

pub fn router(registry: Arc<TaskRegistry>) -> Router {
    Router::new()
        .route("/hls/{channel}/{stream}/{resolution}/{file}", put(hls_put))
        .route("/img-preview/{channel}/{stream}/{resolution}/{file}", put(preview_put))
        .with_state(registry)
}

fn parse_index(file: &str, suffix: &str) -> Option<u64> {
    file.strip_suffix(suffix)?.parse().ok()
}

async fn hls_put(
    Path((channel, stream, resolution, file)): Path<(String, String, String, String)>,
    State(registry): State<Arc<TaskRegistry>>,
    body: Bytes,
) -> StatusCode {
    let Some(task) = registry.lookup(&channel, &stream) else {
        return StatusCode::NOT_FOUND;
    };

    if file.ends_with(".m3u8") {
        let Ok(text) = String::from_utf8(body.to_vec()) else {
            return StatusCode::BAD_REQUEST;
        };
        task.on_playlist_put(&resolution, &text).await;
        return StatusCode::OK;
    }

    if let Some(index) = parse_index(&file, ".ts") {
        let path = fragment_path(&channel, &stream, &resolution, index);
        if let Err(e) = task.storage().write(&path, body.clone()).await {
            tracing::warn!(path, error = %e, "failed to write HLS segment");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        task.cdn_push(&resolution, body);
        task.on_segment_ready(&resolution, index).await;
        return StatusCode::OK;
    }

    StatusCode::BAD_REQUEST
}

async fn preview_put(
    Path((channel, stream, resolution, file)): Path<(String, String, String, String)>,
    State(registry): State<Arc<TaskRegistry>>,
    body: Bytes,
) -> StatusCode {
    let Some(task) = registry.lookup(&channel, &stream) else {
        return StatusCode::NOT_FOUND;
    };

    let Some(index) = parse_index(&file, ".jpg") else {
        return StatusCode::BAD_REQUEST;
    };

    let path = preview_path(&channel, &stream, &resolution, index);
    if let Err(e) = task.storage().write(&path, body).await {
        tracing::warn!(path, error = %e, "failed to write preview image");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    task.on_preview_ready(index).await;
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_index_from_segment_filename() {
        assert_eq!(parse_index("42.ts", ".ts"), Some(42));
        assert_eq!(parse_index("live.m3u8", ".ts"), None);
        assert_eq!(parse_index("not-a-number.ts", ".ts"), None);
    }
}
