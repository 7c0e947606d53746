//! HTTP storage backend: `PUT` to publish, `DELETE` to remove, against a
//! configured base URL.

use crate::{content_type_for, validate_path, Storage, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

/// How the backend authenticates its requests against the remote origin.
#[derive(Debug, Clone)]
pub enum HttpAuth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    Custom { header_value: String },
}

pub struct HttpStorage {
    client: Client,
    base_url: String,
    auth: HttpAuth,
}

impl HttpStorage {
    pub fn new(base_url: impl Into<String>, auth: HttpAuth) -> Self {
        HttpStorage { client: Client::new(), base_url: base_url.into(), auth }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            HttpAuth::None => builder,
            HttpAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            HttpAuth::Bearer { token } => builder.bearer_auth(token),
            HttpAuth::Custom { header_value } => builder.header("Authorization", header_value.clone()),
        }
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        validate_path(path)?;
        let content_type = content_type_for(path);

        let request = self
            .client
            .put(self.url_for(path))
            .header("Content-Type", content_type.mime)
            .header("Cache-Control", content_type.cache_control)
            .body(data);
        let request = self.apply_auth(request);

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Err(StorageError::UnexpectedStatus { status: status.as_u16(), path: path.to_string() });
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;

        let request = self.apply_auth(self.client.delete(self.url_for(path)));
        let response = request.send().await?;
        let status = response.status().as_u16();

        // A concurrent delete (e.g. VOD rollover racing a manual cleanup)
        // may have already removed the object; 404 is success too.
        if status == 200 || status == 404 {
            Ok(())
        } else {
            Err(StorageError::UnexpectedStatus { status, path: path.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn write_succeeds_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/hls/ch1/live.m3u8"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let storage = HttpStorage::new(server.uri(), HttpAuth::None);
        storage.write("hls/ch1/live.m3u8", Bytes::from_static(b"data")).await.unwrap();
    }

    #[tokio::test]
    async fn write_fails_on_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let storage = HttpStorage::new(server.uri(), HttpAuth::None);
        let err = storage.write("x.ts", Bytes::from_static(b"data")).await.unwrap_err();
        assert!(matches!(err, StorageError::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn remove_treats_404_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let storage = HttpStorage::new(server.uri(), HttpAuth::None);
        storage.remove("already-gone.ts").await.unwrap();
    }

    #[tokio::test]
    async fn remove_fails_on_other_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(403)).mount(&server).await;

        let storage = HttpStorage::new(server.uri(), HttpAuth::None);
        let err = storage.remove("forbidden.ts").await.unwrap_err();
        assert!(matches!(err, StorageError::UnexpectedStatus { status: 403, .. }));
    }

    #[tokio::test]
    async fn basic_auth_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(wiremock::matchers::header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let storage = HttpStorage::new(
            server.uri(),
            HttpAuth::Basic { username: "u".to_string(), password: "p".to_string() },
        );
        storage.write("a.ts", Bytes::from_static(b"d")).await.unwrap();
    }
}
