//! Error types for the rtc-bridge core
//!
//! Every failure raised while executing a call is one of these variants. The
//! dispatcher converts them into an Error message exactly once, at the
//! boundary, using [`Error::code`] for the numeric code and the `Display`
//! text for the human-readable message.

use crate::handle::Handle;
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes carried in slot A of an Error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ErrorCode {
    /// Unsupported call type tag
    InvalidCallType = 1,
    /// A response-requiring call arrived without a response callback
    MissingResponseCallback = 2,
    /// Unknown handle, or a handle of another object kind
    HandleNotFound = 3,
    /// Operation on an object that has been freed
    Closed = 4,
    /// Malformed configuration, description, candidate or options payload
    DeserializationFailure = 5,
    /// The WebRTC engine reported an error
    EngineFailure = 6,
    /// Contained panic or bridge construction failure
    Internal = 7,
}

impl ErrorCode {
    /// Decode a numeric code, as found in slot A of an Error message
    pub fn from_raw(raw: usize) -> Option<Self> {
        Some(match raw {
            1 => ErrorCode::InvalidCallType,
            2 => ErrorCode::MissingResponseCallback,
            3 => ErrorCode::HandleNotFound,
            4 => ErrorCode::Closed,
            5 => ErrorCode::DeserializationFailure,
            6 => ErrorCode::EngineFailure,
            7 => ErrorCode::Internal,
            _ => return None,
        })
    }

    /// Numeric value written to the wire
    pub fn as_raw(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidCallType => write!(f, "INVALID_CALL_TYPE"),
            ErrorCode::MissingResponseCallback => write!(f, "MISSING_RESPONSE_CALLBACK"),
            ErrorCode::HandleNotFound => write!(f, "HANDLE_NOT_FOUND"),
            ErrorCode::Closed => write!(f, "CLOSED"),
            ErrorCode::DeserializationFailure => write!(f, "DESERIALIZATION_FAILURE"),
            ErrorCode::EngineFailure => write!(f, "ENGINE_FAILURE"),
            ErrorCode::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Errors that can occur while executing a call
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported call type tag
    #[error("Invalid call type: {0:#x}")]
    InvalidCallType(usize),

    /// Response-requiring call without a response callback
    #[error("Response callback cannot be null for call type: {0:#x}")]
    MissingResponseCallback(usize),

    /// Handle does not resolve to a live object
    #[error("Handle not found: {0}")]
    HandleNotFound(Handle),

    /// Handle resolves to an object of another kind
    #[error("Handle {handle} is not a {expected}")]
    WrongKind {
        /// Offending handle
        handle: Handle,
        /// Object kind the call expected
        expected: &'static str,
    },

    /// Object has been freed
    #[error("Object closed: {0}")]
    Closed(Handle),

    /// Payload could not be parsed
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// WebRTC engine error
    #[error("Engine error: {0}")]
    Engine(String),

    /// Internal error (contained panic, runtime construction)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidCallType(_) => ErrorCode::InvalidCallType,
            Error::MissingResponseCallback(_) => ErrorCode::MissingResponseCallback,
            Error::HandleNotFound(_) | Error::WrongKind { .. } => ErrorCode::HandleNotFound,
            Error::Closed(_) => ErrorCode::Closed,
            Error::Deserialization(_) => ErrorCode::DeserializationFailure,
            Error::Engine(_) => ErrorCode::EngineFailure,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Error::Engine(msg.into())
    }

    /// Create a deserialization error
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Error::Deserialization(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Deserialization(err.to_string())
    }
}
