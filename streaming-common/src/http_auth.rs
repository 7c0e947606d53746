//! Constant-time `Authorization` header checking, shared by every HTTP
//! surface that authenticates with a fixed, pre-shared credential: the
//! coordinator's commands API, the event-callback client, the
//! key-verification client, and the HLS HTTP storage backend.

use subtle::ConstantTimeEq;

/// The configured expectation for an inbound or outbound `Authorization`
/// header. `None` means the surface requires no authentication at all.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    Basic { username: String, password: String },
    Bearer { token: String },
    Custom { expected_value: String },
}

/// Checks `header_value` (the full `Authorization` header, e.g.
/// `"Basic dXNlcjpwYXNz"`) against `scheme`. The scheme prefix is compared
/// normally (it is public); only the credential itself is compared in
/// constant time.
pub fn check_authorization(header_value: &str, scheme: &AuthScheme) -> bool {
    match scheme {
        AuthScheme::Basic { username, password } => {
            let Some(encoded) = header_value.strip_prefix("Basic ") else {
                return false;
            };
            let Ok(decoded) = base64_decode(encoded) else {
                return false;
            };
            let expected = format!("{username}:{password}");
            decoded.as_bytes().ct_eq(expected.as_bytes()).into()
        }
        AuthScheme::Bearer { token } => {
            let Some(presented) = header_value.strip_prefix("Bearer ") else {
                return false;
            };
            presented.as_bytes().ct_eq(token.as_bytes()).into()
        }
        AuthScheme::Custom { expected_value } => header_value.as_bytes().ct_eq(expected_value.as_bytes()).into(),
    }
}

fn base64_decode(s: &str) -> Result<String, ()> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD.decode(s).map_err(|_| ())?;
    String::from_utf8(bytes).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_accepts_matching_credentials() {
        let scheme = AuthScheme::Basic { username: "admin".to_string(), password: "secret".to_string() };
        let header = format!("Basic {}", {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode("admin:secret")
        });
        assert!(check_authorization(&header, &scheme));
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let scheme = AuthScheme::Basic { username: "admin".to_string(), password: "secret".to_string() };
        let header = format!("Basic {}", {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode("admin:wrong")
        });
        assert!(!check_authorization(&header, &scheme));
    }

    #[test]
    fn bearer_auth_accepts_matching_token() {
        let scheme = AuthScheme::Bearer { token: "tok123".to_string() };
        assert!(check_authorization("Bearer tok123", &scheme));
    }

    #[test]
    fn bearer_auth_rejects_missing_prefix() {
        let scheme = AuthScheme::Bearer { token: "tok123".to_string() };
        assert!(!check_authorization("tok123", &scheme));
    }

    #[test]
    fn custom_auth_compares_full_header_value() {
        let scheme = AuthScheme::Custom { expected_value: "X-Shared-Secret abc".to_string() };
        assert!(check_authorization("X-Shared-Secret abc", &scheme));
        assert!(!check_authorization("X-Shared-Secret xyz", &scheme));
    }
}
