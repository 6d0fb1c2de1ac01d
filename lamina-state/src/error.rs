//! Error types for the state layer

use lamina_stream::StreamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to parse config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Stream wiring failed: {0}")]
    Stream(#[from] StreamError),
}

/// Result type using StateError
pub type Result<T> = std::result::Result<T, StateError>;
