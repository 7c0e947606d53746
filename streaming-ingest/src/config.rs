//! Flat environment-variable configuration for the ingest binary (§6).

use streaming_common::env::{flag_is_yes, optional, optional_parsed};
use streaming_common::LogFormat;

use crate::ip_limit::CidrWhitelist;

pub struct Config {
    pub bind_address: String,
    pub http_port: u16,
    pub ssl_port: Option<u16>,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,

    /// `/ws/control/wss` base URL on the coordinator. Unset disables the
    /// control client entirely (useful for local testing of the ingest
    /// session engine alone); this is a startup warning, not a fatal error.
    pub control_base_url: Option<String>,
    pub control_secret: Option<Vec<u8>>,

    pub external_ip: String,
    pub external_port: u16,
    pub external_ssl: bool,

    pub max_ip_concurrent_connections: u32,
    pub concurrent_limit_whitelist: CidrWhitelist,
    /// `None` means unrestricted: every IP may play.
    pub play_whitelist: Option<CidrWhitelist>,

    pub gop_cache_size_bytes: usize,
    pub id_max_length: usize,

    pub log_format: LogFormat,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let ssl_port = std::env::var("SSL_PORT").ok().and_then(|v| v.parse().ok());

        let play_whitelist =
            std::env::var("PLAY_WHITELIST").ok().map(|spec| CidrWhitelist::parse(&spec));

        let gop_cache_size_mb: u64 = optional_parsed("GOP_CACHE_SIZE_MB", 16);

        Ok(Config {
            bind_address: optional("BIND_ADDRESS", "0.0.0.0"),
            http_port: optional_parsed("HTTP_PORT", 8080),
            ssl_port,
            ssl_cert: std::env::var("SSL_CERT").ok(),
            ssl_key: std::env::var("SSL_KEY").ok(),

            control_base_url: std::env::var("CONTROL_BASE_URL").ok(),
            control_secret: std::env::var("CONTROL_SECRET").ok().map(|s| s.into_bytes()),

            external_ip: optional("EXTERNAL_IP", ""),
            external_port: optional_parsed("EXTERNAL_PORT", 0),
            external_ssl: flag_is_yes("EXTERNAL_SSL"),

            max_ip_concurrent_connections: optional_parsed("MAX_IP_CONCURRENT_CONNECTIONS", 4),
            concurrent_limit_whitelist: CidrWhitelist::parse(&optional("CONCURRENT_LIMIT_WHITELIST", "")),
            play_whitelist,

            gop_cache_size_bytes: (gop_cache_size_mb * 1024 * 1024) as usize,
            id_max_length: optional_parsed("ID_MAX_LENGTH", crate::validation::DEFAULT_ID_MAX_LENGTH),

            log_format: LogFormat::from_env_str(&optional("LOG_FORMAT", "pretty")),
            log_level: optional("LOG_LEVEL", "info"),
        })
    }
}
