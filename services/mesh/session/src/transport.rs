//! Transport shapes accepted by a mesh node.
//!
//! A link is either a raw byte stream (TCP, serial, pipes), which gets the
//! SLIP framing from `mesh-wire`, or a message transport that already
//! delivers whole messages. The shape is fixed when the connection is built.

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Default in-memory buffer for stream pairs
const MEMORY_STREAM_BUFFER: usize = 64 * 1024;

/// Any ordered, reliable duplex byte stream
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Message-oriented transport: whole messages in, whole messages out.
///
/// Dropping `outbound` closes the transport; `inbound` yielding `None` is the
/// close notification.
pub struct MessageLink {
    /// Messages to the peer
    pub outbound: mpsc::Sender<Bytes>,
    /// Messages from the peer
    pub inbound: mpsc::Receiver<Bytes>,
}

/// A transport ready to be attached to a node
pub enum Connection {
    /// Raw byte stream; framed on attach
    Stream(Box<dyn ByteStream>),
    /// Message transport; used as is
    Message(MessageLink),
}

impl Connection {
    /// Wrap a byte stream
    pub fn stream<S: ByteStream>(stream: S) -> Self {
        Connection::Stream(Box::new(stream))
    }

    /// Wrap a pair of message channels
    pub fn message(outbound: mpsc::Sender<Bytes>, inbound: mpsc::Receiver<Bytes>) -> Self {
        Connection::Message(MessageLink { outbound, inbound })
    }

    /// Short name of the transport shape, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Connection::Stream(_) => "stream",
            Connection::Message(_) => "message",
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Connection").field(&self.kind()).finish()
    }
}

impl From<TcpStream> for Connection {
    fn from(stream: TcpStream) -> Self {
        // Small messages dominate; do not wait to coalesce
        let _ = stream.set_nodelay(true);
        Connection::stream(stream)
    }
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<Connection> {
    TcpStream::connect(addr).await.map(Connection::from)
}

/// Two stream connections joined back to back in memory
pub fn memory_stream_pair() -> (Connection, Connection) {
    let (a, b) = tokio::io::duplex(MEMORY_STREAM_BUFFER);
    (Connection::stream(a), Connection::stream(b))
}

/// Two message connections joined back to back in memory
pub fn memory_message_pair(depth: usize) -> (Connection, Connection) {
    let (a_tx, b_rx) = mpsc::channel(depth);
    let (b_tx, a_rx) = mpsc::channel(depth);
    (Connection::message(a_tx, a_rx), Connection::message(b_tx, b_rx))
}
