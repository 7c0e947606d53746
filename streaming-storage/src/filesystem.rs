//! Local filesystem storage backend. The default when no remote backend is
//! configured.

use crate::{validate_path, Storage, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemStorage { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        validate_path(path)?;
        let dest = self.resolve(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file and rename into place so a reader
        // polling the destination path never observes a partial write.
        let tmp = sibling_tmp_path(&dest);
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &dest).await?;

        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        let dest = self.resolve(path);
        match fs::remove_file(&dest).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn sibling_tmp_path(dest: &Path) -> PathBuf {
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_and_reads_back_nested_paths() {
        let dir = tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());

        storage
            .write("hls/ch1/s1/live.m3u8", Bytes::from_static(b"#EXTM3U\n"))
            .await
            .unwrap();

        let on_disk = tokio::fs::read(dir.path().join("hls/ch1/s1/live.m3u8")).await.unwrap();
        assert_eq!(on_disk, b"#EXTM3U\n");
    }

    #[tokio::test]
    async fn leaves_no_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        storage.write("a.txt", Bytes::from_static(b"x")).await.unwrap();
        assert!(!dir.path().join("a.txt.tmp").exists());
    }

    #[tokio::test]
    async fn remove_of_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        storage.remove("does-not-exist.ts").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        let err = storage.write("../escape.txt", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }
}
