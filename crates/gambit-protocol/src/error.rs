//! Error types for the protocol layer.

use crate::ErrorCode;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Covers both malformed JSON and JSON that does not match any
    /// message schema; [`ProtocolError::code`] tells the two apart.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The envelope declared a protocol version this server doesn't speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// The message decoded but violates a protocol rule
    /// (empty display name, zero-length time control, ...).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// The error code reported to the client for this failure.
    ///
    /// Bytes that aren't JSON at all are a `PARSE_ERROR`; well-formed JSON
    /// that doesn't fit the schema is an `INVALID_MESSAGE`.
    pub fn code(&self) -> ErrorCode {
        match self {
            #[cfg(feature = "json")]
            Self::Decode(e) if e.is_syntax() || e.is_eof() => ErrorCode::ParseError,
            #[cfg(feature = "json")]
            Self::Encode(_) => ErrorCode::InternalError,
            _ => ErrorCode::InvalidMessage,
        }
    }
}
