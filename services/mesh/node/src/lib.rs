//! Mesh node: link attachment, protocol handler dispatch and locator discovery.
//!
//! A [`Node`] owns a port table of attached links, forwards source-routed
//! messages between them and hands messages addressed to itself to the
//! registered [`ProtocolHandler`]s. The built-in [`Discovery`] handler lets
//! nodes learn the shortest known path to every advertised locator.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_node::{Node, NodeConfig};
//! use mesh_session::memory_stream_pair;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), mesh_node::NodeError> {
//! let a = Node::new(NodeConfig::default());
//! let b = Node::new(NodeConfig::default());
//!
//! let (left, right) = memory_stream_pair();
//! a.attach(left).await?;
//! b.attach(right).await?;
//!
//! b.declare_locator(0x0800, vec![192, 168, 1, 20]).await?;
//! tokio::time::sleep(Duration::from_secs(10)).await;
//!
//! if let Some(path) = a.route_info(0x0800, &[192, 168, 1, 20]).await? {
//!     a.send(&path, 0x0101, &b"hello"[..]).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod node;

pub use config::{DiscoveryConfig, NodeConfig};
pub use discovery::Discovery;
pub use error::NodeError;
pub use handler::{Dispatch, HandlerId, ProtocolHandler};
pub use node::{Node, WeakNode};
