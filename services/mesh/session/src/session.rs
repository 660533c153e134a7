//! Link sessions: the read and write loops behind one attached port.
//!
//! Each session turns its transport into [`SessionEvent`]s on a shared channel
//! and exposes a non-blocking outbound queue. Stream transports get a writer
//! task driving the frame encoder; message transports are written directly.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use mesh_routing::Link;
use mesh_wire::{FrameCodec, FrameError, MAX_INGRESS_BUFFER};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::transport::{ByteStream, Connection, MessageLink};

/// Unique id of an attached link; ports are reused, link ids are not
pub type LinkId = u64;

/// Configuration for link sessions
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Outbound messages buffered per link before sends are refused
    pub queue_depth: usize,
    /// Ingress buffer cap for framed stream links
    pub max_frame_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            max_frame_buffer: MAX_INGRESS_BUFFER,
        }
    }
}

/// Events emitted by sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A complete message arrived
    Message {
        /// Link it arrived on
        link: LinkId,
        /// Port of that link
        port: u8,
        /// Raw message bytes
        message: Bytes,
    },
    /// The transport closed
    Closed {
        /// Link that closed
        link: LinkId,
        /// Port of that link
        port: u8,
    },
}

/// Handle to a running session; dropping it stops reading
#[derive(Debug)]
pub struct SessionHandle {
    link: LinkId,
    port: u8,
    outbound: mpsc::Sender<Bytes>,
    reader: JoinHandle<()>,
}

impl SessionHandle {
    /// Link id
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Port the link is attached on
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Queue a message; `false` if the queue is full or the link is gone
    pub fn try_send(&self, message: Bytes) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Outbound queue full on port {}", self.port);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the transport and stop the read loop
    pub fn close(self) {
        drop(self);
    }
}

impl Link for SessionHandle {
    fn try_send(&self, message: Bytes) -> bool {
        SessionHandle::try_send(self, message)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        // The outbound sender drops with us, which ends the writer
        self.reader.abort();
    }
}

/// Session spawner
pub struct Session;

impl Session {
    /// Start the read/write loops for `connection` attached on `port`
    pub fn spawn(
        connection: Connection,
        link: LinkId,
        port: u8,
        config: &SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        debug!("Starting {} session {} on port {}", connection.kind(), link, port);
        match connection {
            Connection::Stream(stream) => Self::spawn_stream(stream, link, port, config, events),
            Connection::Message(message) => Self::spawn_message(message, link, port, events),
        }
    }

    fn spawn_stream(
        stream: Box<dyn ByteStream>,
        link: LinkId,
        port: u8,
        config: &SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let framed = Framed::new(stream, FrameCodec::with_max_buffer(config.max_frame_buffer));
        let (mut sink, mut frames) = framed.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Bytes>(config.queue_depth);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match sink.send(message).await {
                    Ok(()) => {}
                    Err(FrameError::TooLarge(len)) => {
                        debug!("Dropping {} byte frame on port {}", len, port);
                    }
                    Err(e) => {
                        warn!("Write failed on port {}: {}", port, e);
                        break;
                    }
                }
            }
            // Ends the stream towards the peer
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(message) => {
                        let event = SessionEvent::Message {
                            link,
                            port,
                            message,
                        };
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Read failed on port {}: {}", port, e);
                        break;
                    }
                }
            }
            debug!("Stream session {} on port {} closed", link, port);
            let _ = events.send(SessionEvent::Closed { link, port }).await;
        });

        SessionHandle {
            link,
            port,
            outbound,
            reader,
        }
    }

    fn spawn_message(
        message_link: MessageLink,
        link: LinkId,
        port: u8,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let MessageLink {
            outbound,
            mut inbound,
        } = message_link;

        let reader = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let event = SessionEvent::Message {
                    link,
                    port,
                    message,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            debug!("Message session {} on port {} closed", link, port);
            let _ = events.send(SessionEvent::Closed { link, port }).await;
        });

        SessionHandle {
            link,
            port,
            outbound,
            reader,
        }
    }
}
