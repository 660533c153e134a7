//! Protocol handler capability.
//!
//! Handlers are registered on a [`Node`] and receive every locally delivered
//! message carrying their protocol id. Several handlers may share a protocol
//! id; they are tried in registration order until one returns
//! [`Dispatch::Handled`].

use crate::node::Node;
use async_trait::async_trait;
use bytes::Bytes;
use mesh_topology::Locator;
use mesh_wire::Path;

/// Whether dispatch continues after a handler ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Stop; the message was consumed
    Handled,
    /// Offer the message to the next handler for the protocol
    Pass,
}

/// Identifies a registered handler for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

/// A protocol handler
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Protocol id this handler receives
    fn protocol_id(&self) -> u16;

    /// Locators owned by this handler; advertised with zero hops
    fn locators(&self) -> Vec<Locator> {
        Vec::new()
    }

    /// Called once the handler is registered
    fn on_register(&self, _node: &Node) {}

    /// Handle a delivered message. `return_path` leads back to the sender.
    async fn on_message(&self, node: &Node, return_path: Path, payload: Bytes) -> Dispatch;

    /// Called when the handler is removed or the node shuts down
    async fn on_close(&self) {}
}
