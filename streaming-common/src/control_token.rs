//! HMAC-SHA256 control-connection tokens.
//!
//! Each control client (RTMP-ingest-facing, WS-ingest-facing, HLS-encoder)
//! dials the coordinator's `/ws/control/{kind}` endpoint with a token whose
//! `sub` claim identifies the connection kind. When the coordinator has no
//! `CONTROL_SECRET` configured, verification accepts any token — "open
//! mode", for trusted-network deployments that skip control-plane auth
//! entirely.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed `sub` claim values, one per control connection kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Rtmp,
    Wss,
    Hls,
}

impl ControlKind {
    fn subject(self) -> &'static str {
        match self {
            ControlKind::Rtmp => "rtmp-control",
            ControlKind::Wss => "wss-control",
            ControlKind::Hls => "hls-control",
        }
    }

    fn from_subject(s: &str) -> Option<ControlKind> {
        match s {
            "rtmp-control" => Some(ControlKind::Rtmp),
            "wss-control" => Some(ControlKind::Wss),
            "hls-control" => Some(ControlKind::Hls),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
}

#[derive(Debug, Error)]
pub enum ControlTokenError {
    #[error("token signature or structure is invalid")]
    Invalid,
    #[error("token subject does not name a known control connection kind")]
    UnknownSubject,
}

/// Signs a control token for `kind` using `secret`.
pub fn sign(kind: ControlKind, secret: &[u8]) -> String {
    let claims = Claims { sub: kind.subject().to_string() };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .expect("HS256 encoding of a two-field claim set never fails")
}

/// Verifies `token` against `secret` and returns the connection kind it was
/// issued for. `secret` of `None` means the coordinator is running in open
/// mode: any syntactically well-formed JWT with a recognized `sub` is
/// accepted without a signature check.
pub fn verify(token: &str, secret: Option<&[u8]>) -> Result<ControlKind, ControlTokenError> {
    let claims: Claims = match secret {
        Some(secret) => {
            let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
            validation.validate_exp = false;
            jsonwebtoken::decode(token, &DecodingKey::from_secret(secret), &validation)
                .map_err(|_| ControlTokenError::Invalid)?
                .claims
        }
        None => decode_claims_without_verifying(token)?,
    };

    ControlKind::from_subject(&claims.sub).ok_or(ControlTokenError::UnknownSubject)
}

fn decode_claims_without_verifying(token: &str) -> Result<Claims, ControlTokenError> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    jsonwebtoken::decode(token, &DecodingKey::from_secret(b""), &validation)
        .map_err(|_| ControlTokenError::Invalid)
        .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_matching_secret() {
        let token = sign(ControlKind::Hls, b"s3cr3t");
        assert_eq!(verify(&token, Some(b"s3cr3t")).unwrap(), ControlKind::Hls);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = sign(ControlKind::Wss, b"s3cr3t");
        assert!(verify(&token, Some(b"wrong")).is_err());
    }

    #[test]
    fn open_mode_accepts_any_validly_signed_subject() {
        let token = sign(ControlKind::Rtmp, b"whatever-the-issuer-used");
        assert_eq!(verify(&token, None).unwrap(), ControlKind::Rtmp);
    }

    #[test]
    fn rejects_unknown_subject() {
        let claims = Claims { sub: "not-a-real-kind".to_string() };
        let token =
            jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(b"k")).unwrap();
        assert!(matches!(verify(&token, Some(b"k")), Err(ControlTokenError::UnknownSubject)));
    }
}
