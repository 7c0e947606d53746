use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid channel or key id")]
    InvalidId,
    #[error("channel is already publishing")]
    ChannelOccupied,
    #[error("no encoder capacity available")]
    NoEncoderAvailable,
    #[error("key verification denied the publish")]
    KeyDenied,
    #[error("unauthorized")]
    Unauthorized,
}
