//! Small helpers for reading configuration flat out of the environment.
//!
//! Each binary's `Config::from_env()` reads a fixed set of env vars
//! directly rather than going through a layered config-file loader: there
//! is exactly one configuration layer here (the process environment), so a
//! precedence-merging library would add indirection without adding value.

use std::env::VarError;

/// Reads a required env var, or returns an error naming it.
pub fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|e| match e {
        VarError::NotPresent => anyhow::anyhow!("missing required environment variable {name}"),
        VarError::NotUnicode(_) => anyhow::anyhow!("environment variable {name} is not valid UTF-8"),
    })
}

/// Reads an optional env var, falling back to `default` when unset.
pub fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Reads an optional env var and parses it, falling back to `default` when
/// unset or unparseable (a malformed override should never crash startup).
pub fn optional_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Reads a boolean-flavored env var (`"YES"`, case-insensitive) as used by
/// the CDN-publish and similar feature toggles.
pub fn flag_is_yes(name: &str) -> bool {
    std::env::var(name).map(|v| v.eq_ignore_ascii_case("yes")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_parsed_falls_back_on_missing_var() {
        let value: u32 = optional_parsed("STREAMING_COMMON_TEST_NOT_SET", 128);
        assert_eq!(value, 128);
    }
}
