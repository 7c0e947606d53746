//! S3 and Azure Blob backends, both implemented on top of a single OpenDAL
//! `Operator` so the `Storage` trait impl only has to be written once.

use crate::{content_type_for, validate_path, Storage, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use opendal::Operator;

pub struct ObjectStorage {
    operator: Operator,
}

impl ObjectStorage {
    #[cfg(feature = "s3")]
    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self, StorageError> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(bucket).access_key_id(access_key_id).secret_access_key(secret_access_key);
        if let Some(region) = region {
            builder = builder.region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)?.finish();
        Ok(ObjectStorage { operator })
    }

    #[cfg(feature = "azure")]
    pub fn azure_blob(
        account: &str,
        container: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self, StorageError> {
        use opendal::services::Azblob;

        let builder = Azblob::default()
            .account_name(account)
            .container(container)
            .endpoint(&format!("https://{account}.blob.core.windows.net"))
            .client_secret_credential(tenant_id, client_id, client_secret);

        let operator = Operator::new(builder)?.finish();
        Ok(ObjectStorage { operator })
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        validate_path(path)?;
        let content_type = content_type_for(path);

        self.operator
            .write_with(path, data)
            .content_type(content_type.mime)
            .cache_control(content_type.cache_control)
            .await?;

        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        self.operator.delete(path).await?;
        Ok(())
    }
}
