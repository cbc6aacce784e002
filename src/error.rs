//! Error types for cmdwire.
//!
//! Each operation family gets its own enum so callers can match on exactly
//! the failures that operation can produce:
//!
//! - [`EmitError`] - `Emitter::emit` and friends
//! - [`CloseError`] - `Emitter::close` / `Emitter::close_with_error`
//! - [`ResponseError`] - `Response::next`
//! - [`EncodeError`] - encoder failures
//!
//! [`CommandError`] is the value a stream terminates with. It is carried,
//! not raised: it travels from the command body to the consumer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a command failure.
///
/// Transports translate it into their own conventions (HTTP status,
/// exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    /// Generic failure.
    #[default]
    Normal,
    /// The caller sent something invalid.
    Client,
    /// The command itself misbehaved.
    Implementation,
    /// The requested resource does not exist.
    NotFound,
    /// Unrecoverable failure.
    Fatal,
}

impl ErrorCode {
    /// Numeric form used on the wire.
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::Normal => 0,
            ErrorCode::Client => 1,
            ErrorCode::Implementation => 2,
            ErrorCode::NotFound => 3,
            ErrorCode::Fatal => 4,
        }
    }

    /// Parse the numeric wire form. Unknown codes map to `Normal`.
    pub fn from_u32(code: u32) -> Self {
        match code {
            1 => ErrorCode::Client,
            2 => ErrorCode::Implementation,
            3 => ErrorCode::NotFound,
            4 => ErrorCode::Fatal,
            _ => ErrorCode::Normal,
        }
    }
}

/// Terminal error of a command, recorded once when its stream closes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandError {
    message: String,
    code: ErrorCode,
}

impl CommandError {
    /// Create an error with `ErrorCode::Normal`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::Normal,
        }
    }

    /// Create an error with an explicit code.
    pub fn with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Shorthand for a client error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::with_code(message, ErrorCode::Client)
    }

    /// The human-readable message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error classification.
    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Wire shape of a [`CommandError`]: `{"Message": .., "Code": .., "Type": "error"}`.
#[derive(Serialize, Deserialize)]
struct WireError {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Code")]
    code: u32,
    #[serde(rename = "Type")]
    kind: String,
}

/// Value of the `Type` field that marks a serialized error.
pub(crate) const ERROR_TYPE_TAG: &str = "error";

impl Serialize for CommandError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireError {
            message: self.message.clone(),
            code: self.code.as_u32(),
            kind: ERROR_TYPE_TAG.to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CommandError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireError::deserialize(deserializer)?;
        if wire.kind != ERROR_TYPE_TAG {
            return Err(serde::de::Error::custom(format!(
                "expected Type \"{}\", got \"{}\"",
                ERROR_TYPE_TAG, wire.kind
            )));
        }
        Ok(CommandError::with_code(
            wire.message,
            ErrorCode::from_u32(wire.code),
        ))
    }
}

/// Failure while serializing a value.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JSON serialization failed.
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization failed.
    #[error("MsgPack encode error: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),
}

/// Failure of an emit call.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The emitter was already closed.
    #[error("emitter is closed")]
    ClosedStream,

    /// The request was cancelled before the value was handed off.
    #[error("request cancelled")]
    Cancelled,

    /// The encoder rejected the value.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Writing to the underlying sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A flattened nested stream ended with this error.
    #[error("nested stream failed: {0}")]
    Nested(CommandError),
}

/// Failure of a close call.
#[derive(Debug, Error)]
pub enum CloseError {
    /// The emitter had been closed before.
    #[error("close of closed emitter")]
    AlreadyClosed,

    /// Flushing or syncing the sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CloseError> for EmitError {
    fn from(err: CloseError) -> Self {
        match err {
            CloseError::AlreadyClosed => EmitError::ClosedStream,
            CloseError::Io(e) => EmitError::Io(e),
        }
    }
}

/// Failure observed by the reading side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// The request was cancelled while waiting.
    #[error("request cancelled")]
    Cancelled,

    /// The stream terminated with an error.
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Normal => "normal",
            ErrorCode::Client => "client",
            ErrorCode::Implementation => "implementation",
            ErrorCode::NotFound => "not found",
            ErrorCode::Fatal => "fatal",
        };
        f.write_str(name)
    }
}
