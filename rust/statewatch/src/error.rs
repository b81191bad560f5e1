use crate::hub::ConnectionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("No active connection (none attached, or several attached and none selected)")]
    NoActiveConnection,

    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("Failed to decode state value: {0}")]
    Decode(#[from] DecodeError),

    #[error("Session runtime has shut down")]
    RuntimeClosed,
}

/// Failure to turn a transported value back into a [`crate::StateValue`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("JSON syntax error: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("Malformed value marker: {0:?}")]
    MalformedMarker(String),

    #[error("Value nested deeper than {limit} levels")]
    TooDeep { limit: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty segment at offset {offset} in {path:?}")]
    EmptySegment { path: String, offset: usize },

    #[error("unterminated bracket at offset {offset} in {path:?}")]
    UnterminatedBracket { path: String, offset: usize },

    #[error("unexpected character {found:?} at offset {offset} in {path:?}")]
    UnexpectedChar {
        path: String,
        offset: usize,
        found: char,
    },

    #[error("index {index} is past the end of a {len}-element array in {path:?}")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
