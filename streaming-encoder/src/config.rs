//! Flat environment-variable configuration for the encoder binary (§6).

use streaming_common::env::{flag_is_yes, optional, optional_parsed, required};
use streaming_common::LogFormat;
use streaming_storage::http::HttpAuth;

/// Backend-specific settings for the storage factory (`storage_factory`).
/// Kept as a plain enum rather than an already-built `Arc<dyn Storage>` so
/// tests can inspect which backend was selected without touching the
/// filesystem or network.
pub enum StorageBackend {
    Filesystem { path: String },
    Http { url: String, auth: HttpAuth },
    S3 { bucket: String, region: Option<String>, endpoint: Option<String>, access_key_id: String, secret_access_key: String },
    Azure { account: String, container: String, tenant_id: String, client_id: String, client_secret: String },
}

pub struct Config {
    /// Loopback HTTP sink the transcoder subprocesses PUT segments to.
    pub sink_bind_address: String,
    pub sink_port: u16,

    pub control_base_url: Option<String>,
    pub control_secret: Option<Vec<u8>>,

    pub external_ip: String,
    pub external_port: u16,
    pub external_ssl: bool,

    /// Negative means unbounded, matching the coordinator's encoder-capacity
    /// convention (`capacity < 0` ⇒ always available).
    pub server_capacity: i64,

    pub hls_time_seconds: u32,
    pub hls_live_playlist_size: usize,
    pub hls_vod_max_size: usize,
    pub hls_fragment_count_limit: u64,

    pub storage: StorageBackend,

    pub cdn_enabled: bool,
    pub cdn_urls: Vec<String>,
    pub cdn_push_secret: Option<Vec<u8>>,

    pub log_format: LogFormat,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            sink_bind_address: optional("BIND_ADDRESS", "0.0.0.0"),
            sink_port: optional_parsed("HTTP_PORT", 8090),

            control_base_url: std::env::var("CONTROL_BASE_URL").ok(),
            control_secret: std::env::var("CONTROL_SECRET").ok().map(|s| s.into_bytes()),

            external_ip: optional("EXTERNAL_IP", ""),
            external_port: optional_parsed("EXTERNAL_PORT", 0),
            external_ssl: flag_is_yes("EXTERNAL_SSL"),

            server_capacity: std::env::var("SERVER_CAPACITY").ok().and_then(|v| v.parse().ok()).unwrap_or(-1),

            hls_time_seconds: optional_parsed("HLS_TIME_SECONDS", 6),
            hls_live_playlist_size: optional_parsed("HLS_LIVE_PLAYLIST_SIZE", 5),
            hls_vod_max_size: optional_parsed("HLS_VOD_MAX_SIZE", 60),
            hls_fragment_count_limit: optional_parsed("HLS_FRAGMENT_COUNT_LIMIT", 1_000_000),

            storage: storage_backend_from_env()?,

            cdn_enabled: flag_is_yes("HLS_WS_CDN_ENABLED"),
            cdn_urls: optional("HLS_WS_CDN_URL", "").split_whitespace().map(str::to_string).collect(),
            cdn_push_secret: std::env::var("HLS_WS_CDN_PUSH_SECRET").ok().map(|s| s.into_bytes()),

            log_format: LogFormat::from_env_str(&optional("LOG_FORMAT", "pretty")),
            log_level: optional("LOG_LEVEL", "info"),
        })
    }
}

fn storage_backend_from_env() -> anyhow::Result<StorageBackend> {
    let kind = optional("HLS_STORAGE_TYPE", "FILESYSTEM").to_ascii_uppercase();
    match kind.as_str() {
        "FILESYSTEM" => Ok(StorageBackend::Filesystem { path: optional("HLS_FILESYSTEM_PATH", "./hls") }),
        "HTTP" | "HTTPS" => Ok(StorageBackend::Http {
            url: required("HLS_STORAGE_HTTP_URL")?,
            auth: storage_http_auth_from_env(),
        }),
        "S3" => Ok(StorageBackend::S3 {
            bucket: required("AWS_S3_BUCKET")?,
            region: std::env::var("AWS_REGION").ok(),
            endpoint: std::env::var("AWS_S3_ENDPOINT").ok(),
            access_key_id: required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
        }),
        "AZURE" => Ok(StorageBackend::Azure {
            account: required("AZURE_STORAGE_ACCOUNT")?,
            container: required("AZURE_STORAGE_CONTAINER")?,
            tenant_id: required("AZURE_TENANT_ID")?,
            client_id: required("AZURE_CLIENT_ID")?,
            client_secret: required("AZURE_CLIENT_SECRET")?,
        }),
        other => anyhow::bail!("unrecognized HLS_STORAGE_TYPE {other:?}"),
    }
}

/// `HLS_STORAGE_HTTP_AUTH` selects BASIC/BEARER/CUSTOM; unlike the generic
/// `{PREFIX}_AUTH_USER`/`{PREFIX}_PASSWORD` convention used for the commands
/// API and event callback, this surface's variable names are flat
/// (`HLS_STORAGE_HTTP_USER`/`HLS_STORAGE_HTTP_PASSWORD`/`HLS_STORAGE_HTTP_TOKEN`),
/// matching §6 exactly.
fn storage_http_auth_from_env() -> HttpAuth {
    match std::env::var("HLS_STORAGE_HTTP_AUTH").ok().map(|v| v.to_ascii_uppercase()) {
        Some(mode) if mode == "BASIC" => HttpAuth::Basic {
            username: optional("HLS_STORAGE_HTTP_USER", ""),
            password: optional("HLS_STORAGE_HTTP_PASSWORD", ""),
        },
        Some(mode) if mode == "BEARER" => HttpAuth::Bearer { token: optional("HLS_STORAGE_HTTP_TOKEN", "") },
        Some(mode) if mode == "CUSTOM" => HttpAuth::Custom { header_value: optional("HLS_STORAGE_HTTP_AUTH_CUSTOM", "") },
        _ => HttpAuth::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_http_auth_defaults_to_none() {
        assert!(matches!(storage_http_auth_from_env(), HttpAuth::None));
    }
}
