//! Wire protocol for Gambit.
//!
//! This crate defines the "language" that chess clients and the server
//! speak:
//!
//! - **Types** ([`GameId`], [`Color`], [`TimeControl`], [`GameResult`], ...):
//!   identity and chess vocabulary shared by every layer.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`], [`ErrorCode`]):
//!   the versioned, `type`-tagged JSON objects that travel on the socket.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those messages are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding,
//!   and which [`ErrorCode`] the client sees for it.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (ClientMessage) → Orchestrator → Session
//! ```

mod codec;
mod error;
mod messages;
mod types;

pub use codec::{decode_client_message, encode_server_message, Codec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use gambit_transport::ConnectionId;
pub use messages::{
    ClientEnvelope, ClientMessage, ErrorCode, ServerEnvelope, ServerMessage, PROTOCOL_VERSION,
};
pub use types::{
    ClockSnapshot, Color, EndReason, GameId, GameResult, OpponentInfo, TableId, TableSummary,
    TimeControl,
};
