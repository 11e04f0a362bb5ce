//! [`Transport`] over `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info};

use crate::{Connection, ConnectionId, Inbound, Incoming, Transport, TransportConfig, TransportError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type Socket = WebSocketStream<TcpStream>;

/// Listens for chess clients and upgrades them to WebSocket.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: TransportConfig,
}

impl WebSocketTransport {
    pub async fn bind(addr: &str, config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!(addr, "listening for websocket clients");
        Ok(Self { listener, config })
    }

    fn socket_config(&self) -> WebSocketConfig {
        let mut ws = WebSocketConfig::default();
        ws.max_message_size = Some(self.config.max_message_bytes);
        ws.max_frame_size = Some(self.config.max_message_bytes);
        ws
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Incoming = WebSocketHandshake;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(%peer, "tcp client accepted");
        Ok(WebSocketHandshake {
            tcp,
            peer,
            socket: self.socket_config(),
            limit: self.config.handshake_timeout,
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A TCP client waiting to be upgraded.
pub struct WebSocketHandshake {
    tcp: TcpStream,
    peer: SocketAddr,
    socket: WebSocketConfig,
    limit: Duration,
}

impl Incoming for WebSocketHandshake {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn upgrade(self) -> Result<Self::Connection, Self::Error> {
        let Self {
            tcp,
            peer,
            socket,
            limit,
        } = self;
        let upgrade = tokio_tungstenite::accept_async_with_config(tcp, Some(socket));
        let socket = tokio::time::timeout(limit, upgrade)
            .await
            .map_err(|_| TransportError::HandshakeTimeout { peer, limit })?
            .map_err(|e| TransportError::Handshake {
                peer,
                source: Box::new(e),
            })?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        debug!(conn_id = %id, %peer, "client connected");
        Ok(WebSocketConnection::new(id, peer, socket))
    }
}

/// An upgraded client socket, split so reads never block writes.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: Mutex<SplitSink<Socket, Message>>,
    reader: Mutex<SplitStream<Socket>>,
}

impl WebSocketConnection {
    fn new(id: ConnectionId, peer: SocketAddr, socket: Socket) -> Self {
        let (writer, reader) = socket.split();
        Self {
            id,
            peer,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    /// Text frame for UTF-8 payloads (every JSON message), binary otherwise.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let frame = match std::str::from_utf8(data) {
            Ok(text) => Message::text(text.to_owned()),
            Err(_) => Message::binary(data.to_vec()),
        };
        self.writer
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| TransportError::Closed(Box::new(e)))
    }

    async fn recv(&self) -> Result<Option<Inbound>, Self::Error> {
        let mut reader = self.reader.lock().await;
        while let Some(frame) = reader.next().await {
            match frame.map_err(|e| TransportError::Receive(Box::new(e)))? {
                Message::Text(text) => return Ok(Some(Inbound::Message(text.as_bytes().to_vec()))),
                Message::Binary(data) => return Ok(Some(Inbound::Message(data.to_vec()))),
                Message::Close(_) => return Ok(None),
                // tungstenite queues the pong for a ping itself
                Message::Ping(_) | Message::Pong(_) => return Ok(Some(Inbound::Heartbeat)),
                Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .send(Message::Ping(Default::default()))
            .await
            .map_err(|e| TransportError::Closed(Box::new(e)))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Closed(Box::new(e)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
