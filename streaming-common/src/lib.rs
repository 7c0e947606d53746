//! Ambient support shared across the coordinator, ingest, and encoder
//! binaries: logging initialization, HTTP auth checking, and
//! control-connection token signing/verification.

pub mod control_token;
pub mod env;
pub mod http_auth;
pub mod logging;

pub use control_token::{ControlKind, ControlTokenError};
pub use http_auth::{check_authorization, AuthScheme};
pub use logging::{init_logging, LogFormat};
