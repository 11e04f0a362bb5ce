//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The server only ever talks to a codec through the [`Codec`] trait, so a
//! binary format can replace JSON without touching the handler.

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    ClientEnvelope, ClientMessage, PROTOCOL_VERSION, ProtocolError, ServerEnvelope, ServerMessage,
};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// Decodes one inbound frame and checks its protocol version.
///
/// # Errors
/// - `Decode` for bytes that aren't a valid message
/// - `UnsupportedVersion` when `version` isn't [`PROTOCOL_VERSION`]
pub fn decode_client_message<C: Codec>(
    codec: &C,
    data: &[u8],
) -> Result<ClientMessage, ProtocolError> {
    let envelope: ClientEnvelope = codec.decode(data)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(envelope.version));
    }
    Ok(envelope.message)
}

/// Wraps a server message in a versioned envelope and encodes it.
pub fn encode_server_message<C: Codec>(
    codec: &C,
    message: &ServerMessage,
) -> Result<Vec<u8>, ProtocolError> {
    codec.encode(&ServerEnvelope::new(message))
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// The browser client speaks JSON natively, and JSON frames are readable
/// in DevTools, which is worth more here than the bytes a binary format
/// would save on a turn-based game.
///
/// ```rust
/// use gambit_protocol::{decode_client_message, ClientMessage, GameId, JsonCodec};
///
/// let frame = br#"{"version":1,"type":"resign","gameId":4}"#;
/// let msg = decode_client_message(&JsonCodec, frame).unwrap();
/// assert_eq!(msg, ClientMessage::Resign { game_id: GameId(4) });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
