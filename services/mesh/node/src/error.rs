//! Node error types.

use mesh_routing::RouteError;
use mesh_wire::WireError;
use thiserror::Error;

/// Failures reported by node operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node has shut down
    #[error("node is shut down")]
    Closed,
    /// Routing refused the operation
    #[error(transparent)]
    Route(#[from] RouteError),
}

impl From<WireError> for NodeError {
    fn from(err: WireError) -> Self {
        NodeError::Route(RouteError::Path(err))
    }
}

impl NodeError {
    /// Whether the connection pool was full
    pub fn is_pool_full(&self) -> bool {
        matches!(self, NodeError::Route(RouteError::PoolFull))
    }
}
