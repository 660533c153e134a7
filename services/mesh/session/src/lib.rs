//! Link transports and per-link read/write loops for mesh.
//!
//! A node attaches [`Connection`]s. Stream connections (TCP, pipes, serial)
//! are framed with the SLIP codec from `mesh-wire`; message connections are
//! passed through untouched. Every attached link runs as a [`Session`] that
//! reports inbound messages and closure as [`SessionEvent`]s.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use mesh_session::{memory_stream_pair, Session, SessionConfig, SessionEvent};
//! use tokio::sync::mpsc;
//!
//! # async fn example() {
//! let (left, right) = memory_stream_pair();
//! let (tx, mut rx) = mpsc::channel(64);
//! let config = SessionConfig::default();
//!
//! let left = Session::spawn(left, 1, 1, &config, tx.clone());
//! let _right = Session::spawn(right, 2, 1, &config, tx);
//!
//! left.try_send(Bytes::from_static(b"hello"));
//! if let Some(SessionEvent::Message { message, .. }) = rx.recv().await {
//!     println!("got {:?}", message);
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod session;
pub mod transport;

pub use session::{LinkId, Session, SessionConfig, SessionEvent, SessionHandle};
pub use transport::{
    connect_tcp, listen_tcp, memory_message_pair, memory_stream_pair, ByteStream, Connection,
    MessageLink,
};
