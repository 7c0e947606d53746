//! Local error taxonomy for the encoder (§4.11): transcode-task failures,
//! loopback sink routing failures, and CDN-push protocol errors. Control
//! connection and reconnect failures are handled inline with `anyhow`, same
//! as the coordinator and ingest control clients.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("probe of source timed out or failed")]
    ProbeFailed,
    #[error("failed to spawn transcoder subprocess: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("storage write failed: {0}")]
    Storage(#[from] streaming_storage::StorageError),
    #[error("playlist parse error: {0}")]
    Playlist(#[from] streaming_hls::PlaylistError),
}
