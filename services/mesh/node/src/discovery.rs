//! Built-in locator discovery handler.
//!
//! Every interval the handler advertises the node's own locators with the
//! zero-hop path, plus every learned locator unchanged, to each directly
//! attached neighbor on protocol [`DISCOVERY_PROTOCOL_ID`]. Received adverts
//! are merged into the [`LocatorDatabase`], which grows each path by the hops
//! the advert travelled.

use crate::config::DiscoveryConfig;
use crate::error::NodeError;
use crate::handler::{Dispatch, ProtocolHandler};
use crate::node::{Node, WeakNode};
use async_trait::async_trait;
use bytes::Bytes;
use mesh_topology::{unix_millis, LocatorDatabase, LocatorEntry, LocatorKey};
use mesh_wire::{decode_advert, encode_advert, Path, DISCOVERY_PROTOCOL_ID};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Path-vector discovery handler
pub struct Discovery {
    config: DiscoveryConfig,
    table: Arc<RwLock<LocatorDatabase>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Discovery {
    /// Create a handler; advertising starts once it is registered on a node
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            table: Arc::new(RwLock::new(LocatorDatabase::new())),
            ticker: Mutex::new(None),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Best learned path to a remote locator
    pub async fn route(&self, key: &LocatorKey) -> Option<Path> {
        self.table.read().await.route(key, unix_millis()).cloned()
    }

    /// Best learned path to `value` on `protocol_id`
    pub async fn route_info(&self, protocol_id: u16, value: &[u8]) -> Option<Path> {
        self.route(&LocatorKey::new(protocol_id, Bytes::copy_from_slice(value)))
            .await
    }

    /// Learned entries, sorted by key
    pub async fn snapshot(&self) -> Vec<(LocatorKey, LocatorEntry)> {
        self.table.read().await.snapshot()
    }

    fn stop_ticker(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = ticker.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl ProtocolHandler for Discovery {
    fn protocol_id(&self) -> u16 {
        DISCOVERY_PROTOCOL_ID
    }

    fn on_register(&self, node: &Node) {
        let task = tokio::spawn(run_ticker(
            node.downgrade(),
            self.table.clone(),
            self.config.interval(),
        ));
        let previous = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!("Discovery started, interval {:?}", self.config.interval());
    }

    async fn on_message(&self, node: &Node, return_path: Path, payload: Bytes) -> Dispatch {
        let records = decode_advert(&payload);
        if records.is_empty() {
            return Dispatch::Handled;
        }

        let local = match node.local_locators().await {
            Ok(local) => local,
            Err(_) => return Dispatch::Handled,
        };

        let stats = self
            .table
            .write()
            .await
            .merge(records, &return_path, &local, unix_millis());
        trace!(
            "Merged advert via {}: {} new, {} replaced, {} ignored",
            return_path,
            stats.inserted,
            stats.replaced,
            stats.ignored
        );
        Dispatch::Handled
    }

    async fn on_close(&self) {
        self.stop_ticker();
        self.table.write().await.clear();
        debug!("Discovery stopped");
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

async fn run_ticker(weak: WeakNode, table: Arc<RwLock<LocatorDatabase>>, period: Duration) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(node) = weak.upgrade() else {
            break;
        };
        match advertise(&node, &table).await {
            Ok(sent) => trace!("Discovery advert sent to {} neighbors", sent),
            Err(NodeError::Closed) => break,
            Err(e) => debug!("Discovery advert failed: {}", e),
        }
    }
    debug!("Discovery ticker exited");
}

/// One discovery tick; returns how many neighbors the advert went to
async fn advertise(node: &Node, table: &RwLock<LocatorDatabase>) -> Result<usize, NodeError> {
    let local = node.local_locators().await?;
    let records = table.write().await.tick(&local, unix_millis());

    let ports = node.ports().await?;
    if ports.is_empty() {
        return Ok(0);
    }

    let payload = encode_advert(&records);
    let mut sent = 0;
    for port in ports {
        // Neighbor delivers to itself: [port, 0] here, [0] on arrival
        let target = Path::from_hops(&[port])?;
        match node.send(&target, DISCOVERY_PROTOCOL_ID, payload.clone()).await {
            Ok(()) => sent += 1,
            Err(NodeError::Closed) => return Err(NodeError::Closed),
            Err(e) => trace!("Advert to port {} not sent: {}", port, e),
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use mesh_session::{memory_message_pair, memory_stream_pair};
    use mesh_topology::{Locator, DEFAULT_LOCATOR_TTL};
    use mesh_wire::LocatorRecord;
    use std::future::Future;
    use tokio::time::sleep;

    const PROTO: u16 = DISCOVERY_PROTOCOL_ID;

    fn fast_node() -> Node {
        Node::new(NodeConfig {
            discovery: Some(DiscoveryConfig {
                interval_ms: 20,
                locator_ttl_ms: 2_000,
            }),
            ..NodeConfig::default()
        })
    }

    async fn link(a: &Node, b: &Node) -> (u8, u8) {
        let (a_end, b_end) = memory_stream_pair();
        (a.attach(a_end).await.unwrap(), b.attach(b_end).await.unwrap())
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("discovery did not converge");
    }

    async fn hops(node: &Node, value: &[u8]) -> Option<Vec<u8>> {
        node.route_info(PROTO, value)
            .await
            .unwrap()
            .map(|path| path.hops().to_vec())
    }

    #[tokio::test]
    async fn test_four_node_convergence() {
        let a = fast_node();
        let b = fast_node();
        let c = fast_node();
        let d = fast_node();

        let (_a_b, _b_a) = link(&a, &b).await;
        let (_b_c, _c_b) = link(&b, &c).await;
        let (a_c, c_a) = link(&a, &c).await;
        let (c_d, d_c) = link(&c, &d).await;

        let values: [[u8; 4]; 4] = [
            [192, 168, 1, 10],
            [192, 168, 1, 20],
            [192, 168, 1, 30],
            [192, 168, 1, 40],
        ];
        for (node, value) in [&a, &b, &c, &d].into_iter().zip(values) {
            node.declare_locator(PROTO, value.to_vec()).await.unwrap();
        }
        let [va, _vb, vc, vd] = values;

        eventually(|| async {
            hops(&a, &vc).await == Some(vec![a_c])
                && hops(&c, &vd).await == Some(vec![c_d])
                && hops(&a, &vd).await == Some(vec![a_c, c_d])
                && hops(&d, &va).await == Some(vec![d_c, c_a])
        })
        .await;

        // Stable across further rounds
        sleep(Duration::from_millis(100)).await;
        assert_eq!(hops(&a, &vd).await, Some(vec![a_c, c_d]));
        assert_eq!(hops(&a, &va).await, Some(vec![]));

        let discovery = a.discovery().await.unwrap().unwrap();
        assert_eq!(discovery.snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn test_self_locator_wins_over_remote() {
        let a = fast_node();
        let b = fast_node();
        link(&a, &b).await;

        let shared = [10, 0, 0, 1];
        let only_b = [10, 0, 0, 2];
        a.declare_locator(PROTO, shared.to_vec()).await.unwrap();
        b.declare_locator(PROTO, shared.to_vec()).await.unwrap();
        b.declare_locator(PROTO, only_b.to_vec()).await.unwrap();

        eventually(|| async { hops(&a, &only_b).await.is_some() }).await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(hops(&a, &shared).await, Some(vec![]));
        let discovery = a.discovery().await.unwrap().unwrap();
        assert_eq!(discovery.route_info(PROTO, &shared).await, None);
    }

    #[tokio::test]
    async fn test_handler_locators_are_advertised() {
        /// Owns one locator on its own protocol
        struct Service;

        #[async_trait]
        impl ProtocolHandler for Service {
            fn protocol_id(&self) -> u16 {
                0x0101
            }

            fn locators(&self) -> Vec<Locator> {
                vec![Locator::new(vec![7, 7], DEFAULT_LOCATOR_TTL)]
            }

            async fn on_message(&self, _node: &Node, _return_path: Path, _payload: Bytes) -> Dispatch {
                Dispatch::Handled
            }
        }

        let a = fast_node();
        let b = fast_node();
        let (a_b, _b_a) = link(&a, &b).await;
        b.register_handler(Arc::new(Service)).await.unwrap();

        assert_eq!(b.route_info(0x0101, &[7, 7]).await.unwrap(), Some(Path::local()));
        eventually(|| async {
            a.route_info(0x0101, &[7, 7]).await.unwrap().map(|path| path.hops().to_vec())
                == Some(vec![a_b])
        })
        .await;

        let owned = b.local_locators().await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].protocol_id, 0x0101);
    }

    #[tokio::test]
    async fn test_advert_merge_on_message() {
        let node = Node::new(NodeConfig::without_discovery());
        let discovery = Arc::new(Discovery::new(DiscoveryConfig::default()));
        node.register_handler(discovery.clone()).await.unwrap();

        let record = LocatorRecord::new(
            0x0101,
            unix_millis() + 60_000,
            Path::from_hops(&[4]).unwrap(),
            Bytes::from_static(b"svc"),
        );
        let outcome = discovery
            .on_message(&node, Path::from_hops(&[2]).unwrap(), encode_advert([&record]))
            .await;
        assert_eq!(outcome, Dispatch::Handled);

        assert_eq!(
            discovery.route_info(0x0101, b"svc").await,
            Some(Path::from_hops(&[2, 4]).unwrap())
        );

        // Garbage is ignored
        let outcome = discovery
            .on_message(&node, Path::local(), Bytes::from_static(&[0xFF, 0xFF, 0x00]))
            .await;
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(discovery.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_removal_clears_table_and_stops_adverts() {
        let a = fast_node();
        let b = Node::new(NodeConfig::without_discovery());
        let (a_end, b_end) = memory_message_pair(64);
        a.attach(a_end).await.unwrap();
        b.attach(b_end).await.unwrap();

        let discovery = a.discovery().await.unwrap().unwrap();
        let sent_before = {
            eventually(|| async { a.stats().await.unwrap().packets_sent > 0 }).await;
            a.stats().await.unwrap().packets_sent
        };
        assert!(sent_before > 0);

        // Handler ids are assigned in order; discovery is always the first
        let id = crate::handler::HandlerId(0);
        assert!(a.remove_handler(id).await.unwrap());
        assert!(a.discovery().await.unwrap().is_none());
        assert!(discovery.snapshot().await.is_empty());

        let settled = a.stats().await.unwrap().packets_sent;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(a.stats().await.unwrap().packets_sent, settled);
    }
}
