//! Outbound key-verification call made at the start of the publish
//! handshake. An unconfigured `KEY_VERIFICATION_URL` means every key is
//! valid by default, with `ORIGINAL` resolution and recording disabled —
//! this lets a deployment run without an application backend at all.

use reqwest::Client;
use streaming_common::http_auth::AuthScheme;
use streaming_hls::{PreviewsConfig, ResolutionList};

pub struct KeyVerificationClient {
    client: Client,
    url: Option<String>,
    auth: Option<AuthScheme>,
}

#[derive(Debug, Clone)]
pub struct PublishGrant {
    pub resolutions: ResolutionList,
    pub record: bool,
    pub previews: PreviewsConfig,
}

impl Default for PublishGrant {
    fn default() -> Self {
        PublishGrant { resolutions: ResolutionList { has_original: true, resolutions: Vec::new() }, record: false, previews: PreviewsConfig::disabled() }
    }
}

impl KeyVerificationClient {
    pub fn new(url: Option<String>, auth: Option<AuthScheme>) -> Self {
        KeyVerificationClient { client: Client::new(), url, auth }
    }

    /// Returns `Some(grant)` if the key is valid, `None` if verification
    /// denied it (non-200 response). When no verification URL is
    /// configured, every key is valid.
    pub async fn verify(&self, channel: &str, key: &str, user_ip: &str) -> anyhow::Result<Option<PublishGrant>> {
        let Some(url) = &self.url else {
            return Ok(Some(PublishGrant::default()));
        };

        let mut request = self
            .client
            .post(url)
            .header("x-streaming-channel", channel)
            .header("x-streaming-key", key)
            .header("x-user-ip", user_ip);
        if let Some(auth) = &self.auth {
            request = apply_auth(request, auth);
        }

        let response = request.send().await?;
        if response.status().as_u16() != 200 {
            return Ok(None);
        }

        let resolutions = response
            .headers()
            .get("x-resolutions")
            .and_then(|v| v.to_str().ok())
            .map(ResolutionList::decode)
            .unwrap_or_else(|| ResolutionList::decode(""));

        let record = response
            .headers()
            .get("x-record")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let previews = response
            .headers()
            .get("x-previews")
            .and_then(|v| v.to_str().ok())
            .map(PreviewsConfig::decode)
            .unwrap_or_else(PreviewsConfig::disabled);

        Ok(Some(PublishGrant { resolutions, record, previews }))
    }
}

fn apply_auth(request: reqwest::RequestBuilder, auth: &AuthScheme) -> reqwest::RequestBuilder {
    match auth {
        AuthScheme::Basic { username, password } => request.basic_auth(username, Some(password)),
        AuthScheme::Bearer { token } => request.bearer_auth(token),
        AuthScheme::Custom { expected_value } => request.header("Authorization", expected_value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn unconfigured_url_grants_by_default() {
        let client = KeyVerificationClient::new(None, None);
        let grant = client.verify("ch1", "k1", "1.2.3.4").await.unwrap().unwrap();
        assert!(grant.resolutions.has_original);
        assert!(!grant.record);
    }

    #[tokio::test]
    async fn non_200_denies() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(403)).mount(&server).await;

        let client = KeyVerificationClient::new(Some(server.uri()), None);
        assert!(client.verify("ch1", "k1", "1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parses_grant_headers_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-streaming-channel", "ch1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-resolutions", "ORIGINAL,720x480-30")
                    .insert_header("x-record", "true")
                    .insert_header("x-previews", "256x144,10"),
            )
            .mount(&server)
            .await;

        let client = KeyVerificationClient::new(Some(server.uri()), None);
        let grant = client.verify("ch1", "k1", "1.2.3.4").await.unwrap().unwrap();
        assert!(grant.record);
        assert_eq!(grant.resolutions.resolutions.len(), 1);
        assert!(grant.previews.enabled);
    }
}
