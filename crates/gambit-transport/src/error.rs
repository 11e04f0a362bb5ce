use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Boxed WebSocket protocol error, so the enum stays the same whether or
/// not the `websocket` feature is enabled.
pub type WsError = Box<dyn std::error::Error + Send + Sync>;

/// Why a socket could not be opened, upgraded, or used.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The listener itself failed; the accept loop may retry.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A TCP client connected but never completed the WebSocket upgrade.
    #[error("handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: WsError,
    },

    #[error("handshake with {peer} took longer than {limit:?}")]
    HandshakeTimeout { peer: SocketAddr, limit: Duration },

    /// The peer went away while a frame was being written.
    #[error("peer closed the connection: {0}")]
    Closed(#[source] WsError),

    /// A frame could not be read, including frames over the size cap.
    #[error("receive failed: {0}")]
    Receive(#[source] WsError),
}
