//! The node façade and its actor.
//!
//! All mutable node state (port table, handler list, declared locators) lives
//! in one actor task. [`Node`] is a cheap clonable handle that sends commands
//! to it and awaits the replies. Inbound link traffic reaches the same task as
//! [`SessionEvent`]s, so every state change happens on one logical thread.
//!
//! Handler dispatch never runs on the actor. Delivered messages are queued to
//! one dispatcher task per node, which starts them in arrival order and
//! awaits the matching handlers of each message in registration order. A
//! handler may therefore call back into the node without deadlocking, and a
//! message sent to the local node is dispatched only after the sending call
//! has returned.

use crate::config::NodeConfig;
use crate::discovery::Discovery;
use crate::error::NodeError;
use crate::handler::{Dispatch, HandlerId, ProtocolHandler};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use mesh_routing::{Delivery, Router, RouterStats, RoutingDecision, SendOutcome};
use mesh_session::{Connection, LinkId, Session, SessionConfig, SessionEvent, SessionHandle};
use mesh_topology::{Locator, LocatorKey, OwnedLocator, DEFAULT_LOCATOR_TTL};
use mesh_wire::Path;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Commands queued ahead of the actor before callers wait
const COMMAND_QUEUE_DEPTH: usize = 256;

type HandlerRef = Arc<dyn ProtocolHandler>;

enum Command {
    Attach {
        connection: Connection,
        reply: oneshot::Sender<Result<u8, NodeError>>,
    },
    RegisterHandler {
        handler: HandlerRef,
        reply: oneshot::Sender<HandlerId>,
    },
    RemoveHandler {
        id: HandlerId,
        reply: oneshot::Sender<Option<HandlerRef>>,
    },
    Discovery {
        reply: oneshot::Sender<Option<Arc<Discovery>>>,
    },
    DeclareLocator {
        protocol_id: u16,
        value: Bytes,
        ttl: Option<Duration>,
        reply: oneshot::Sender<()>,
    },
    WithdrawLocator {
        key: LocatorKey,
        reply: oneshot::Sender<bool>,
    },
    Send {
        target: Path,
        protocol_id: u16,
        payload: Bytes,
        return_path: Path,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    RouteInfo {
        key: LocatorKey,
        reply: oneshot::Sender<RouteLookup>,
    },
    Ports {
        reply: oneshot::Sender<Vec<u8>>,
    },
    LocalLocators {
        reply: oneshot::Sender<Vec<OwnedLocator>>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<HandlerRef>>,
    },
}

/// A delivered message and the handlers to offer it to
struct DispatchJob {
    handlers: Vec<HandlerRef>,
    delivery: Delivery,
}

enum RouteLookup {
    Local,
    Remote(Arc<Discovery>),
    Unknown,
}

/// Handle to a running mesh node
#[derive(Clone)]
pub struct Node {
    commands: mpsc::Sender<Command>,
}

/// Non-owning handle; does not keep the node alive
#[derive(Clone)]
pub struct WeakNode {
    commands: mpsc::WeakSender<Command>,
}

impl WeakNode {
    /// The node, if it is still running
    pub fn upgrade(&self) -> Option<Node> {
        self.commands.upgrade().map(|commands| Node { commands })
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakNode").finish_non_exhaustive()
    }
}

impl Node {
    /// Start a node. Must be called inside a tokio runtime.
    ///
    /// The discovery handler is registered unless `config.discovery` is `None`.
    /// The node stops when [`Node::shutdown`] is called or the last handle is
    /// dropped.
    pub fn new(config: NodeConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(config.session().queue_depth);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let node = Node {
            commands: commands_tx,
        };

        let locator_ttl = config
            .discovery
            .as_ref()
            .map(|discovery| discovery.locator_ttl())
            .unwrap_or(DEFAULT_LOCATOR_TTL);

        let mut actor = NodeActor {
            router: Router::new(),
            session_config: config.session(),
            locator_ttl,
            handlers: Vec::new(),
            declared: Vec::new(),
            discovery: None,
            next_handler_id: 0,
            next_link_id: 0,
            commands: commands_rx,
            events: events_rx,
            events_tx,
            dispatcher: dispatch_tx,
        };

        if let Some(discovery_config) = config.discovery {
            let discovery = Arc::new(Discovery::new(discovery_config));
            let id = actor.add_handler(discovery.clone());
            actor.discovery = Some((id, discovery.clone()));
            discovery.on_register(&node);
        }

        tokio::spawn(run_dispatcher(node.downgrade(), dispatch_rx));
        tokio::spawn(actor.run());
        info!("Mesh node started");
        node
    }

    /// Non-owning handle to this node
    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            commands: self.commands.downgrade(),
        }
    }

    /// Whether the node has stopped accepting commands
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NodeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| NodeError::Closed)?;
        response.await.map_err(|_| NodeError::Closed)
    }

    /// Attach a transport on the smallest free port
    pub async fn attach(&self, connection: impl Into<Connection>) -> Result<u8, NodeError> {
        let connection = connection.into();
        self.request(|reply| Command::Attach { connection, reply })
            .await?
    }

    /// Register a protocol handler after those already registered
    pub async fn register_handler(&self, handler: HandlerRef) -> Result<HandlerId, NodeError> {
        let id = self
            .request(|reply| Command::RegisterHandler {
                handler: handler.clone(),
                reply,
            })
            .await?;
        handler.on_register(self);
        Ok(id)
    }

    /// Remove a handler and run its close hook; `false` if it was not registered
    pub async fn remove_handler(&self, id: HandlerId) -> Result<bool, NodeError> {
        match self
            .request(|reply| Command::RemoveHandler { id, reply })
            .await?
        {
            Some(handler) => {
                handler.on_close().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The built-in discovery handler, if registered
    pub async fn discovery(&self) -> Result<Option<Arc<Discovery>>, NodeError> {
        self.request(|reply| Command::Discovery { reply }).await
    }

    /// Own a locator not tied to any handler; replaces an earlier declaration.
    ///
    /// The locator is advertised with the configured discovery TTL.
    pub async fn declare_locator(
        &self,
        protocol_id: u16,
        value: impl Into<Bytes>,
    ) -> Result<(), NodeError> {
        self.declare(protocol_id, value.into(), None).await
    }

    /// Like [`Node::declare_locator`] with an explicit advertised lifetime
    pub async fn declare_locator_with_ttl(
        &self,
        protocol_id: u16,
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<(), NodeError> {
        self.declare(protocol_id, value.into(), Some(ttl)).await
    }

    async fn declare(
        &self,
        protocol_id: u16,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), NodeError> {
        self.request(|reply| Command::DeclareLocator {
            protocol_id,
            value,
            ttl,
            reply,
        })
        .await
    }

    /// Stop owning a declared locator
    pub async fn withdraw_locator(&self, protocol_id: u16, value: &[u8]) -> Result<bool, NodeError> {
        let key = LocatorKey::new(protocol_id, Bytes::copy_from_slice(value));
        self.request(|reply| Command::WithdrawLocator { key, reply })
            .await
    }

    /// Send a message along `target` with the zero-hop return path
    pub async fn send(
        &self,
        target: &Path,
        protocol_id: u16,
        payload: impl Into<Bytes>,
    ) -> Result<(), NodeError> {
        self.send_with_return_path(target, protocol_id, payload, &Path::local())
            .await
    }

    /// Send a message along `target` carrying an explicit return path.
    ///
    /// A local target is dispatched to this node's handlers after the call
    /// returns. Otherwise the message is queued on the first hop's link;
    /// delivery beyond that is not confirmed.
    pub async fn send_with_return_path(
        &self,
        target: &Path,
        protocol_id: u16,
        payload: impl Into<Bytes>,
        return_path: &Path,
    ) -> Result<(), NodeError> {
        let payload = payload.into();
        self.request(|reply| Command::Send {
            target: target.clone(),
            protocol_id,
            payload,
            return_path: return_path.clone(),
            reply,
        })
        .await?
    }

    /// Best known path to a locator; the zero-hop path for self-owned ones
    pub async fn route_info(&self, protocol_id: u16, value: &[u8]) -> Result<Option<Path>, NodeError> {
        let key = LocatorKey::new(protocol_id, Bytes::copy_from_slice(value));
        let lookup = self
            .request(|reply| Command::RouteInfo {
                key: key.clone(),
                reply,
            })
            .await?;
        Ok(match lookup {
            RouteLookup::Local => Some(Path::local()),
            RouteLookup::Remote(discovery) => discovery.route(&key).await,
            RouteLookup::Unknown => None,
        })
    }

    /// Ports with a live link, ascending
    pub async fn ports(&self) -> Result<Vec<u8>, NodeError> {
        self.request(|reply| Command::Ports { reply }).await
    }

    /// Locators owned by this node: handler locators, then declared ones
    pub async fn local_locators(&self) -> Result<Vec<OwnedLocator>, NodeError> {
        self.request(|reply| Command::LocalLocators { reply })
            .await
    }

    /// Forwarding statistics
    pub async fn stats(&self) -> Result<RouterStats, NodeError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Close every link and every handler, then stop the node.
    ///
    /// Dispatches already in flight are not waited for.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        let handlers = self.request(|reply| Command::Shutdown { reply }).await?;
        for handler in handlers {
            handler.on_close().await;
        }
        info!("Mesh node shut down");
        Ok(())
    }
}

struct NodeActor {
    router: Router<SessionHandle>,
    session_config: SessionConfig,
    // Lifetime for declarations without their own
    locator_ttl: Duration,
    handlers: Vec<(HandlerId, HandlerRef)>,
    declared: Vec<OwnedLocator>,
    discovery: Option<(HandlerId, Arc<Discovery>)>,
    next_handler_id: u64,
    next_link_id: LinkId,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<SessionEvent>,
    // Cloned into every new session
    events_tx: mpsc::Sender<SessionEvent>,
    // Unbounded so the actor never waits on a handler
    dispatcher: mpsc::UnboundedSender<DispatchJob>,
}

impl NodeActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        // Reached without a shutdown command when every handle was dropped
        self.commands.close();
        for handler in self.close_all() {
            handler.on_close().await;
        }
        debug!("Node actor stopped");
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Attach { connection, reply } => {
                let _ = reply.send(self.attach(connection));
            }
            Command::RegisterHandler { handler, reply } => {
                let _ = reply.send(self.add_handler(handler));
            }
            Command::RemoveHandler { id, reply } => {
                let _ = reply.send(self.remove_handler(id));
            }
            Command::Discovery { reply } => {
                let _ = reply.send(self.discovery.as_ref().map(|(_, d)| d.clone()));
            }
            Command::DeclareLocator {
                protocol_id,
                value,
                ttl,
                reply,
            } => {
                let ttl = ttl.unwrap_or(self.locator_ttl);
                let locator = OwnedLocator::new(protocol_id, Locator::new(value, ttl));
                let key = locator.key();
                self.declared.retain(|owned| owned.key() != key);
                debug!(
                    "Declared locator {:?} on protocol {:#06x}",
                    key.value, key.protocol_id
                );
                self.declared.push(locator);
                let _ = reply.send(());
            }
            Command::WithdrawLocator { key, reply } => {
                let before = self.declared.len();
                self.declared.retain(|owned| owned.key() != key);
                let _ = reply.send(self.declared.len() != before);
            }
            Command::Send {
                target,
                protocol_id,
                payload,
                return_path,
                reply,
            } => {
                let _ = reply.send(self.send(&target, protocol_id, payload, &return_path));
            }
            Command::RouteInfo { key, reply } => {
                let _ = reply.send(self.lookup(&key));
            }
            Command::Ports { reply } => {
                let _ = reply.send(self.router.ports().ports());
            }
            Command::LocalLocators { reply } => {
                let _ = reply.send(self.local_locators());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.router.stats().clone());
            }
            Command::Shutdown { reply } => {
                info!("Shutting down mesh node");
                self.commands.close();
                let _ = reply.send(self.close_all());
                return false;
            }
        }
        true
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message {
                link,
                port,
                message,
            } => {
                if !self.is_current(link, port) {
                    trace!("Ignoring message from stale link {} on port {}", link, port);
                    return;
                }
                if let RoutingDecision::Local(delivery) = self.router.route_inbound(port, &message) {
                    self.dispatch(delivery);
                }
            }
            SessionEvent::Closed { link, port } => {
                if self.is_current(link, port) {
                    self.router.detach(port);
                    info!("Link on port {} closed", port);
                }
            }
        }
    }

    fn is_current(&self, link: LinkId, port: u8) -> bool {
        self.router
            .ports()
            .get(port)
            .is_some_and(|handle| handle.link() == link)
    }

    fn attach(&mut self, connection: Connection) -> Result<u8, NodeError> {
        let link = self.next_link_id;
        let kind = connection.kind();
        let config = &self.session_config;
        let events = self.events_tx.clone();

        let port = self
            .router
            .attach_with(|port| Session::spawn(connection, link, port, config, events))
            .map_err(|e| {
                warn!("Rejected {} link: {}", kind, e);
                NodeError::from(e)
            })?;

        self.next_link_id += 1;
        info!("Attached {} link on port {}", kind, port);
        Ok(port)
    }

    fn add_handler(&mut self, handler: HandlerRef) -> HandlerId {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        debug!(
            "Registered handler {:?} for protocol {:#06x}",
            id,
            handler.protocol_id()
        );
        self.handlers.push((id, handler));
        id
    }

    fn remove_handler(&mut self, id: HandlerId) -> Option<HandlerRef> {
        let index = self.handlers.iter().position(|(handler_id, _)| *handler_id == id)?;
        let (_, handler) = self.handlers.remove(index);
        if self.discovery.as_ref().is_some_and(|(discovery_id, _)| *discovery_id == id) {
            self.discovery = None;
        }
        debug!("Removed handler {:?}", id);
        Some(handler)
    }

    fn send(
        &mut self,
        target: &Path,
        protocol_id: u16,
        payload: Bytes,
        return_path: &Path,
    ) -> Result<(), NodeError> {
        match self.router.send(target, protocol_id, payload, return_path)? {
            SendOutcome::Local(delivery) => self.dispatch(delivery),
            SendOutcome::Forwarded(port) => {
                trace!("Sent protocol {:#06x} out port {}", protocol_id, port);
            }
        }
        Ok(())
    }

    fn dispatch(&self, delivery: Delivery) {
        let handlers: Vec<HandlerRef> = self
            .handlers
            .iter()
            .filter(|(_, handler)| handler.protocol_id() == delivery.protocol_id)
            .map(|(_, handler)| handler.clone())
            .collect();

        if handlers.is_empty() {
            debug!(
                "No handler for protocol {:#06x}, dropping message",
                delivery.protocol_id
            );
            return;
        }

        if self.dispatcher.send(DispatchJob { handlers, delivery }).is_err() {
            debug!("Dispatcher stopped, dropping message");
        }
    }

    fn lookup(&self, key: &LocatorKey) -> RouteLookup {
        if self.local_locators().iter().any(|owned| owned.key() == *key) {
            return RouteLookup::Local;
        }
        match &self.discovery {
            Some((_, discovery)) => RouteLookup::Remote(discovery.clone()),
            None => RouteLookup::Unknown,
        }
    }

    fn local_locators(&self) -> Vec<OwnedLocator> {
        let mut locators: Vec<OwnedLocator> = self
            .handlers
            .iter()
            .flat_map(|(_, handler)| {
                let protocol_id = handler.protocol_id();
                handler
                    .locators()
                    .into_iter()
                    .map(move |locator| OwnedLocator::new(protocol_id, locator))
            })
            .collect();
        locators.extend(self.declared.iter().cloned());
        locators
    }

    /// Detach every link and hand back the handlers for closing
    fn close_all(&mut self) -> Vec<HandlerRef> {
        for (port, handle) in self.router.detach_all() {
            debug!("Closing link on port {}", port);
            handle.close();
        }
        self.discovery = None;
        self.declared.clear();
        self.handlers.drain(..).map(|(_, handler)| handler).collect()
    }
}

/// Starts queued deliveries in arrival order.
///
/// Deliveries are polled together on this one task, so a handler waiting on
/// I/O does not hold back later messages, but handlers never run in parallel.
async fn run_dispatcher(node: WeakNode, mut jobs: mpsc::UnboundedReceiver<DispatchJob>) {
    let mut running = FuturesUnordered::new();
    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => {
                    let Some(node) = node.upgrade() else {
                        continue;
                    };
                    running.push(deliver(node, job));
                }
                None => break,
            },
            Some(()) = running.next(), if !running.is_empty() => {}
        }
    }

    // The actor is gone; let started deliveries finish
    while running.next().await.is_some() {}
    debug!("Dispatcher stopped");
}

async fn deliver(node: Node, job: DispatchJob) {
    let DispatchJob { handlers, delivery } = job;
    for handler in handlers {
        let outcome = handler
            .on_message(&node, delivery.return_path.clone(), delivery.payload.clone())
            .await;
        if outcome == Dispatch::Handled {
            return;
        }
    }
    trace!("Every handler passed on protocol {:#06x}", delivery.protocol_id);
}
