//! Flat environment-variable configuration for the coordinator binary.

use streaming_common::env::{optional, optional_parsed, required};
use streaming_common::http_auth::AuthScheme;
use streaming_common::LogFormat;

pub struct Config {
    pub bind_address: String,
    pub http_port: u16,
    pub ssl_port: Option<u16>,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,

    pub control_secret: Option<Vec<u8>>,
    pub commands_auth: Option<AuthScheme>,

    pub event_callback_url: Option<String>,
    pub event_callback_auth: Option<AuthScheme>,

    pub key_verification_url: Option<String>,
    pub key_verification_auth: Option<AuthScheme>,

    pub id_max_length: usize,
    pub active_streams_path: std::path::PathBuf,

    pub log_format: LogFormat,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let ssl_port = std::env::var("SSL_PORT").ok().and_then(|v| v.parse().ok());

        Ok(Config {
            bind_address: optional("BIND_ADDRESS", "0.0.0.0"),
            http_port: optional_parsed("HTTP_PORT", 80),
            ssl_port,
            ssl_cert: std::env::var("SSL_CERT").ok(),
            ssl_key: std::env::var("SSL_KEY").ok(),

            control_secret: std::env::var("CONTROL_SECRET").ok().map(|s| s.into_bytes()),
            commands_auth: auth_scheme_from_env("COMMANDS_AUTH")?,

            event_callback_url: std::env::var("EVENT_CALLBACK_URL").ok(),
            event_callback_auth: event_callback_auth_from_env()?,

            key_verification_url: std::env::var("KEY_VERIFICATION_URL").ok(),
            key_verification_auth: key_verification_auth_from_env()?,

            id_max_length: optional_parsed("ID_MAX_LENGTH", crate::validation::DEFAULT_ID_MAX_LENGTH),
            active_streams_path: optional("ACTIVE_STREAMS_FILE", "active-streams.txt").into(),

            log_format: LogFormat::from_env_str(&optional("LOG_FORMAT", "pretty")),
            log_level: optional("LOG_LEVEL", "info"),
        })
    }
}

/// `COMMANDS_AUTH` style: `{PREFIX}_AUTH` selects BASIC/BEARER/CUSTOM, with
/// `{PREFIX}_AUTH_USER`/`{PREFIX}_PASSWORD` (note the asymmetric naming,
/// preserved intentionally), `{PREFIX}_AUTH_TOKEN`, or `{PREFIX}_AUTH_CUSTOM`.
fn auth_scheme_from_env(prefix: &str) -> anyhow::Result<Option<AuthScheme>> {
    let mode = match std::env::var(format!("{prefix}_AUTH")) {
        Ok(mode) => mode,
        Err(_) => return Ok(None),
    };

    match mode.to_ascii_uppercase().as_str() {
        "BASIC" => Ok(Some(AuthScheme::Basic {
            username: required(&format!("{prefix}_AUTH_USER"))?,
            password: required(&format!("{prefix}_PASSWORD"))?,
        })),
        "BEARER" => Ok(Some(AuthScheme::Bearer { token: required(&format!("{prefix}_AUTH_TOKEN"))? })),
        "CUSTOM" => Ok(Some(AuthScheme::Custom { expected_value: required(&format!("{prefix}_AUTH_CUSTOM"))? })),
        _ => Ok(None),
    }
}

fn event_callback_auth_from_env() -> anyhow::Result<Option<AuthScheme>> {
    auth_scheme_from_env("EVENT_CALLBACK")
}

fn key_verification_auth_from_env() -> anyhow::Result<Option<AuthScheme>> {
    auth_scheme_from_env("KEY_VERIFICATION")
}
