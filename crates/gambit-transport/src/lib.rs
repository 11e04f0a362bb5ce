//! Sockets for Gambit.
//!
//! A chess client keeps one WebSocket open for the whole visit: lobby,
//! queue, and every game it plays. This crate accepts those sockets and
//! hands the server a [`Connection`] it can read and write from separate
//! tasks.
//!
//! Accepting and upgrading are separate steps. [`Transport::accept`] hands
//! back a raw socket as soon as TCP is up; the caller decides whether to
//! admit it and runs the (timed) upgrade in its own task, so a client that
//! stalls mid-handshake only ever holds up itself.
//!
//! Every connection gets a process-unique [`ConnectionId`]. The layers
//! above key their state by it (queue entries, table hosts, seats, rate
//! limit windows). A player who drops and comes back arrives on a new id
//! and proves who they are with a reconnect token instead.
//!
//! # Feature Flags
//!
//! - `websocket` (default): [`WebSocketTransport`] on `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::{TransportError, WsError};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketHandshake, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Identifies one socket for as long as it stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Limits applied while accepting and reading sockets.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Longest a client may take to finish the WebSocket upgrade.
    ///
    /// Default: 10 seconds.
    pub handshake_timeout: Duration,

    /// Largest inbound message accepted. Chess messages are a few hundred
    /// bytes; anything near this is abuse.
    ///
    /// Default: 16 KiB.
    pub max_message_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_message_bytes: 16 * 1024,
        }
    }
}

/// What a read off a [`Connection`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An application message.
    Message(Vec<u8>),
    /// A ping or pong. Carries nothing, but proves the peer is still there.
    Heartbeat,
}

/// Source of new client connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Incoming: Incoming<Connection = Self::Connection, Error = Self::Error>;
    type Error: std::error::Error + Send + Sync;

    /// Next accepted socket, not yet upgraded.
    ///
    /// Returns as soon as the TCP connection exists; it never waits on the
    /// client.
    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error>;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// A socket that has been accepted but not yet upgraded.
pub trait Incoming: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Where the client connected from. Known before the upgrade, so
    /// per-address limits can be applied first.
    fn peer_addr(&self) -> SocketAddr;

    /// Finishes the handshake, bounded by the configured timeout.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;
}

/// One client socket.
///
/// Reading and writing are independent: a task may be parked in
/// [`recv`](Connection::recv) while another pushes data through
/// [`send`](Connection::send). The server relies on this to deliver an
/// opponent's move while the player's own socket is idle.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Next inbound frame, or `Ok(None)` once the peer has closed.
    async fn recv(&self) -> Result<Option<Inbound>, Self::Error>;

    /// Asks the peer to prove it is alive. The answer shows up in
    /// [`recv`](Connection::recv) as [`Inbound::Heartbeat`].
    async fn ping(&self) -> Result<(), Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    /// Where the client connected from, for per-address limits.
    fn peer_addr(&self) -> SocketAddr;
}
