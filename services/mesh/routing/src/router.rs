//! Forwarding engine and routing decision logic

use crate::table::PortTable;
use bytes::Bytes;
use mesh_wire::header::split_protocol;
use mesh_wire::{MessageHeader, Path, WireError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Outbound side of an attached link
pub trait Link {
    /// Queue a message without blocking; `false` if the link cannot take it
    fn try_send(&self, message: Bytes) -> bool;
}

/// A message that reached its destination node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Path back to the origin, usable as a target path for replies
    pub return_path: Path,
    /// Protocol id selecting the handlers
    pub protocol_id: u16,
    /// Message content after the protocol id
    pub payload: Bytes,
}

/// Outcome of routing one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Deliver to local protocol handlers
    Local(Delivery),
    /// Forwarded out the given port
    Forwarded(u8),
    /// Dropped
    Dropped(DropReason),
}

/// Outcome of a locally originated send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Addressed to this node; dispatch locally
    Local(Delivery),
    /// Queued on the given port
    Forwarded(u8),
}

/// Reason for dropping a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Next hop port is not attached
    NoRoute,
    /// Target or return path could not be parsed
    MalformedPath,
    /// Return path would exceed the hop limit
    PathTooLong,
    /// Delivered message has no protocol id
    Truncated,
    /// Next hop link refused the message
    LinkUnavailable,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoRoute => write!(f, "no route to next hop"),
            DropReason::MalformedPath => write!(f, "malformed path"),
            DropReason::PathTooLong => write!(f, "path too long"),
            DropReason::Truncated => write!(f, "truncated message"),
            DropReason::LinkUnavailable => write!(f, "link unavailable"),
        }
    }
}

/// Routing failures reported to local senders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// First hop port is not attached
    #[error("unknown port {0}")]
    UnknownPort(u8),
    /// All 255 ports are in use
    #[error("connection pool full")]
    PoolFull,
    /// Link refused the message
    #[error("link on port {0} unavailable")]
    LinkUnavailable(u8),
    /// Path failed validation
    #[error("invalid path: {0}")]
    Path(#[from] WireError),
}

/// Router statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Messages delivered locally
    pub packets_local: u64,
    /// Messages forwarded to a neighbor
    pub packets_forwarded: u64,
    /// Locally originated messages queued on a link
    pub packets_sent: u64,
    /// Messages dropped
    pub packets_dropped: u64,
    /// Breakdown of drop reasons
    pub drop_reasons: HashMap<String, u64>,
}

/// Source-routing forwarding engine over a port table
#[derive(Debug)]
pub struct Router<L> {
    ports: PortTable<L>,
    stats: RouterStats,
}

impl<L: Link> Router<L> {
    /// Create a router with no attached links
    pub fn new() -> Self {
        Self {
            ports: PortTable::new(),
            stats: RouterStats::default(),
        }
    }

    /// Attach a link on the smallest free port
    pub fn attach_with<F>(&mut self, build: F) -> Result<u8, RouteError>
    where
        F: FnOnce(u8) -> L,
    {
        self.ports.insert_with(build).ok_or(RouteError::PoolFull)
    }

    /// Detach the link on `port`; idempotent
    pub fn detach(&mut self, port: u8) -> Option<L> {
        self.ports.remove(port)
    }

    /// The port table
    pub fn ports(&self) -> &PortTable<L> {
        &self.ports
    }

    /// Detach every link
    pub fn detach_all(&mut self) -> Vec<(u8, L)> {
        self.ports.drain()
    }

    /// Routing statistics so far
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Route a message that arrived on `inbound_port`
    pub fn route_inbound(&mut self, inbound_port: u8, message: &Bytes) -> RoutingDecision {
        let decision = self.decide(inbound_port, message);
        match &decision {
            RoutingDecision::Local(delivery) => {
                trace!(
                    "Delivering protocol {:#06x} from port {} locally",
                    delivery.protocol_id,
                    inbound_port
                );
                self.stats.packets_local += 1;
            }
            RoutingDecision::Forwarded(port) => {
                trace!("Forwarded message from port {} to port {}", inbound_port, port);
                self.stats.packets_forwarded += 1;
            }
            RoutingDecision::Dropped(reason) => {
                debug!("Dropping message from port {}: {}", inbound_port, reason);
                self.record_drop(*reason);
            }
        }
        decision
    }

    fn decide(&self, inbound_port: u8, message: &Bytes) -> RoutingDecision {
        let (header, body) = match MessageHeader::parse(message) {
            Ok(parsed) => parsed,
            Err(_) => return RoutingDecision::Dropped(DropReason::MalformedPath),
        };

        // The only path built by accumulation: one port per hop back to the origin
        let return_path = match header.return_path.prepend(inbound_port) {
            Ok(path) => path,
            Err(_) => return RoutingDecision::Dropped(DropReason::PathTooLong),
        };

        let next_hop = header.target.first();
        let remaining = match header.target.advance() {
            None => {
                return match split_protocol(&body) {
                    Ok((protocol_id, payload)) => RoutingDecision::Local(Delivery {
                        return_path,
                        protocol_id,
                        payload,
                    }),
                    Err(_) => RoutingDecision::Dropped(DropReason::Truncated),
                };
            }
            Some(remaining) => remaining,
        };

        let Some(link) = self.ports.get(next_hop) else {
            return RoutingDecision::Dropped(DropReason::NoRoute);
        };

        let forward = MessageHeader::new(remaining, return_path).encode(&body);
        if link.try_send(forward) {
            RoutingDecision::Forwarded(next_hop)
        } else {
            RoutingDecision::Dropped(DropReason::LinkUnavailable)
        }
    }

    /// Send a locally originated message along `target`.
    ///
    /// A local target is handed back for dispatch instead of touching any link.
    pub fn send(
        &mut self,
        target: &Path,
        protocol_id: u16,
        payload: Bytes,
        return_path: &Path,
    ) -> Result<SendOutcome, RouteError> {
        let next_hop = target.first();
        let Some(remaining) = target.advance() else {
            return Ok(SendOutcome::Local(Delivery {
                return_path: return_path.clone(),
                protocol_id,
                payload,
            }));
        };

        let link = self
            .ports
            .get(next_hop)
            .ok_or(RouteError::UnknownPort(next_hop))?;

        let message = MessageHeader::new(remaining, return_path.clone())
            .encode_with_protocol(protocol_id, &payload);
        if !link.try_send(message) {
            self.record_drop(DropReason::LinkUnavailable);
            return Err(RouteError::LinkUnavailable(next_hop));
        }

        self.stats.packets_sent += 1;
        Ok(SendOutcome::Forwarded(next_hop))
    }

    fn record_drop(&mut self, reason: DropReason) {
        self.stats.packets_dropped += 1;
        *self.stats.drop_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }
}

impl<L: Link> Default for Router<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct MockLink {
        sent: Rc<RefCell<Vec<Bytes>>>,
        refuse: bool,
    }

    impl Link for MockLink {
        fn try_send(&self, message: Bytes) -> bool {
            if self.refuse {
                return false;
            }
            self.sent.borrow_mut().push(message);
            true
        }
    }

    fn path(raw: &[u8]) -> Path {
        Path::try_from(raw).unwrap()
    }

    #[test]
    fn test_local_delivery_prepends_inbound_port() {
        let mut router: Router<MockLink> = Router::new();
        let message = Bytes::from_static(&[0, 4, 0, 0x12, 0x34, b'h', b'i']);

        let decision = router.route_inbound(7, &message);
        assert_eq!(
            decision,
            RoutingDecision::Local(Delivery {
                return_path: path(&[7, 4, 0]),
                protocol_id: 0x1234,
                payload: Bytes::from_static(b"hi"),
            })
        );
        assert_eq!(router.stats().packets_local, 1);
    }

    #[test]
    fn test_forward_pops_target_and_grows_return_path() {
        let mut router = Router::new();
        let link = MockLink::default();
        let sent = link.sent.clone();
        let port = router.attach_with(|_| link).unwrap();
        assert_eq!(port, 1);

        let message = Bytes::from_static(&[1, 6, 0, 0, 0x08, 0x00, 0xAA]);
        assert_eq!(router.route_inbound(3, &message), RoutingDecision::Forwarded(1));

        let forwarded = sent.borrow();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].as_ref(), &[6, 0, 3, 0, 0x08, 0x00, 0xAA]);
        assert_eq!(router.stats().packets_forwarded, 1);
    }

    #[test]
    fn test_drops() {
        let mut router = Router::new();
        router
            .attach_with(|_| MockLink {
                refuse: true,
                ..Default::default()
            })
            .unwrap();

        // Unknown next hop
        let unknown = Bytes::from_static(&[9, 0, 0, 0x08, 0x00]);
        assert_eq!(
            router.route_inbound(1, &unknown),
            RoutingDecision::Dropped(DropReason::NoRoute)
        );
        // No terminator in return path
        let malformed = Bytes::from_static(&[0, 5, 5]);
        assert_eq!(
            router.route_inbound(1, &malformed),
            RoutingDecision::Dropped(DropReason::MalformedPath)
        );
        // Missing protocol id
        let truncated = Bytes::from_static(&[0, 0, 0x08]);
        assert_eq!(
            router.route_inbound(1, &truncated),
            RoutingDecision::Dropped(DropReason::Truncated)
        );
        // Link refuses
        let refused = Bytes::from_static(&[1, 0, 0, 0x08, 0x00]);
        assert_eq!(
            router.route_inbound(2, &refused),
            RoutingDecision::Dropped(DropReason::LinkUnavailable)
        );

        let stats = router.stats();
        assert_eq!(stats.packets_dropped, 4);
        assert_eq!(stats.drop_reasons.get("no route to next hop"), Some(&1));
    }

    #[test]
    fn test_send() {
        let mut router = Router::new();
        let link = MockLink::default();
        let sent = link.sent.clone();
        router.attach_with(|_| link).unwrap();

        let outcome = router
            .send(&path(&[1, 2, 0]), 0x0800, Bytes::from_static(b"x"), &Path::local())
            .unwrap();
        assert_eq!(outcome, SendOutcome::Forwarded(1));
        assert_eq!(sent.borrow()[0].as_ref(), &[2, 0, 0, 0x08, 0x00, b'x']);

        assert_eq!(
            router.send(&path(&[5, 0]), 0x0800, Bytes::new(), &Path::local()),
            Err(RouteError::UnknownPort(5))
        );

        let local = router
            .send(&Path::local(), 0x0101, Bytes::from_static(b"me"), &path(&[3, 0]))
            .unwrap();
        assert_eq!(
            local,
            SendOutcome::Local(Delivery {
                return_path: path(&[3, 0]),
                protocol_id: 0x0101,
                payload: Bytes::from_static(b"me"),
            })
        );
        assert_eq!(sent.borrow().len(), 1);
    }

    #[test]
    fn test_pool_full() {
        let mut router: Router<MockLink> = Router::new();
        for _ in 0..255 {
            router.attach_with(|_| MockLink::default()).unwrap();
        }
        assert_eq!(
            router.attach_with(|_| MockLink::default()),
            Err(RouteError::PoolFull)
        );
        assert_eq!(router.ports().len(), 255);
    }
}
