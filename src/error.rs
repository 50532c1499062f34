// Error handling for the playback core

use thiserror::Error;

/// Playback error types
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    /// Failed to open or probe a media resource
    #[error("Load error: {0}")]
    Load(String),

    /// Decoding error
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Playback error (output pipeline)
    #[error("Playback error: {0}")]
    Playback(String),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Device error (output hardware)
    #[error("Device error: {0}")]
    Device(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, PlayerError>;

impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        PlayerError::Io(err.to_string())
    }
}
