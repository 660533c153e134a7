//! Path-vector locator discovery state for mesh.
//!
//! Every node keeps the best known path to every locator (an opaque service
//! identity scoped by a protocol id) it has heard about. Adverts carry paths
//! relative to the advertiser; the receiver prepends its own hop, so path
//! length is the hop count and the shortest fresh path wins.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locator;

pub use locator::*;
