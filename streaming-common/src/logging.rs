//! Structured logging initialization, shared by the coordinator, ingest,
//! and encoder binaries.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `LOG_FORMAT` values. Anything other than `json` is treated as `pretty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env_str(s: &str) -> LogFormat {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Initializes the global `tracing` subscriber. Must be called exactly once,
/// before any other subsystem starts, so that startup failures are
/// themselves logged.
///
/// `level` is the default filter directive used when `RUST_LOG` is unset;
/// `RUST_LOG`, when present, always wins (`EnvFilter`'s usual precedence).
pub fn init_logging(format: LogFormat, level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => {
            registry
                .with(fmt::layer().json().with_target(true).with_line_number(true).with_file(true))
                .init();
        }
        LogFormat::Pretty => {
            registry.with(fmt::layer().pretty().with_target(true)).init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_case_insensitive() {
        assert_eq!(LogFormat::from_env_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_env_str("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_env_str("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_env_str("anything-else"), LogFormat::Pretty);
    }
}
