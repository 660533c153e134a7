//! Port table and source-routed forwarding decisions for mesh.
//!
//! This crate is the switching fabric of a node: it numbers attached links,
//! reads the path header of every inbound message and either delivers it
//! locally or forwards it out the next port. It never blocks and never fails
//! loudly; every outcome is a value.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod router;
pub mod table;

pub use router::*;
pub use table::*;
