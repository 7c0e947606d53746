//! Storage backends for published HLS artifacts (playlists, segments,
//! preview images). Every backend stores under a caller-supplied relative
//! path and exposes the same three operations: write, write the raw bytes
//! of a path, and remove.
//!
//! Paths are always validated before being handed to a backend: no leading
//! `/` and no `..` path component, so a malformed channel or stream id can
//! never escape the configured storage root.

mod content_type;
pub mod filesystem;
pub mod http;
pub mod object;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use content_type::content_type_for;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage path {0:?} is not relative to the storage root")]
    InvalidPath(String),
    #[error("storage backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage backend returned unexpected status {status} for {path}")]
    UnexpectedStatus { status: u16, path: String },
    #[error("object storage error: {0}")]
    Object(#[from] opendal::Error),
}

/// A destination for published HLS artifacts.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Writes `data` to `path`, replacing any existing content.
    async fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError>;

    /// Removes the object at `path`. Removing a path that does not exist is
    /// not an error — callers delete opportunistically during playlist
    /// rollover and VOD pruning, and a race with a prior delete must not
    /// fail the caller.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;
}

/// Validates that `path` is safe to hand to any backend: relative, with no
/// `..` component that could escape the configured root.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.starts_with('/') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_paths() {
        assert!(validate_path("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(validate_path("hls/ch1/../../etc/passwd").is_err());
    }

    #[test]
    fn accepts_ordinary_relative_paths() {
        assert!(validate_path("hls/ch1/s1/720x480-30/live.m3u8").is_ok());
    }
}
