//! Builds the configured `Storage` backend (§4.8) from `Config::storage`.
//! Kept separate from `config.rs` so the env-parsing stays pure (testable
//! without touching OpenDAL/reqwest construction).

use std::sync::Arc;

use streaming_storage::filesystem::FilesystemStorage;
use streaming_storage::http::HttpStorage;
use streaming_storage::object::ObjectStorage;
use streaming_storage::Storage;

use crate::config::StorageBackend;

pub fn build(backend: &StorageBackend) -> anyhow::Result<Arc<dyn Storage>> {
    match backend {
        StorageBackend::Filesystem { path } => Ok(Arc::new(FilesystemStorage::new(path.clone()))),
        StorageBackend::Http { url, auth } => Ok(Arc::new(HttpStorage::new(url.clone(), auth.clone()))),
        StorageBackend::S3 { bucket, region, endpoint, access_key_id, secret_access_key } => Ok(Arc::new(
            ObjectStorage::s3(bucket, region.as_deref(), endpoint.as_deref(), access_key_id, secret_access_key)?,
        )),
        StorageBackend::Azure { account, container, tenant_id, client_id, client_secret } => {
            Ok(Arc::new(ObjectStorage::azure_blob(account, container, tenant_id, client_id, client_secret)?))
        }
    }
}
