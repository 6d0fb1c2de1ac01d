//! Error types for lamina streams

use crate::types::StreamId;
use thiserror::Error;

/// Error carried by a stream's terminal error event
///
/// Errors fan out to every listener of a failing stream, so this type is
/// cheap to clone and carries plain text rather than boxed sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A producer or upstream stream failed
    #[error("stream failed: {0}")]
    Failed(String),

    /// A per-key child stream failed inside a dynamic combinator
    #[error("child {key} failed on channel `{channel}`: {source}")]
    Child {
        /// Key of the failing child
        key: String,
        /// Channel the combinator was tracking
        channel: String,
        /// The child's own error
        source: Box<StreamError>,
    },

    /// `imitate` was called on a stream that already has a producer
    #[error("stream {0} already has a producer and cannot imitate another")]
    AlreadyProduced(StreamId),
}

impl StreamError {
    /// Create a plain failure
    pub fn failed(message: impl Into<String>) -> Self {
        StreamError::Failed(message.into())
    }

    /// Wrap a child's error with the key and channel it came from
    pub fn child(key: impl std::fmt::Display, channel: impl Into<String>, source: StreamError) -> Self {
        StreamError::Child {
            key: key.to_string(),
            channel: channel.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, unwrapping child context
    pub fn root_cause(&self) -> &StreamError {
        match self {
            StreamError::Child { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type using StreamError
pub type Result<T> = std::result::Result<T, StreamError>;
