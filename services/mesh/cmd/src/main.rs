//! Meshlink node binary.
//!
//! Runs one mesh node over TCP links: accepts peers on a listen address,
//! dials configured peers, declares its locators and periodically logs the
//! locator routes learned through discovery.

use anyhow::Context;
use clap::Parser;
use mesh_node::Node;
use mesh_session::{connect_tcp, listen_tcp};
use mesh_topology::unix_millis;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{LocatorConfig, MeshConfig};
use logging::MeshLogFormatter;

/// Route table report interval when discovery is disabled
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Source-routed mesh node with locator discovery
#[derive(Parser, Debug)]
#[command(name = "meshlink", version, about = "Source-routed mesh node with locator discovery")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "meshlink.yaml")]
    config: PathBuf,

    /// Listen address, e.g. 0.0.0.0:9000
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Connect to address, e.g. 127.0.0.1:9000 (repeatable)
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// IPv4 locator to declare on the discovery protocol (repeatable)
    #[arg(long)]
    locator: Vec<Ipv4Addr>,

    /// Discovery advert interval, e.g. 5s
    #[arg(long)]
    discovery_interval: Option<humantime::Duration>,

    /// Disable the discovery handler
    #[arg(long)]
    no_discovery: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Command line flags override file and environment settings
    fn apply(&self, config: &mut MeshConfig) {
        if let Some(listen) = self.listen {
            config.listen = Some(listen);
        }
        config.connect.extend(self.connect.iter().copied());
        config
            .locators
            .extend(self.locator.iter().map(|addr| LocatorConfig {
                protocol_id: mesh_wire::DISCOVERY_PROTOCOL_ID,
                value: addr.octets().to_vec(),
            }));
        if let (Some(interval), Some(discovery)) =
            (self.discovery_interval, config.node.discovery.as_mut())
        {
            discovery.interval_ms = Duration::from(interval).as_millis() as u64;
        }
        if self.no_discovery {
            config.node.discovery = None;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let env_filter = ["meshlink", "mesh_wire", "mesh_routing", "mesh_topology", "mesh_session", "mesh_node"]
        .iter()
        .try_fold(env_filter, |filter, krate| {
            format!("{}={}", krate, args.log_level)
                .parse()
                .map(|directive| filter.add_directive(directive))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(MeshLogFormatter::new("meshlink"))
        .init();

    info!("Starting meshlink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = MeshConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    let node = Node::new(config.node.clone());
    declare_locators(&node, &config).await?;

    if let Some(addr) = config.listen {
        let listener = listen_tcp(addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;
        component_info!("transport", "Listening on {}", addr);
        tokio::spawn(accept_loop(listener, node.clone()));
    }

    for addr in &config.connect {
        match connect_tcp(*addr).await {
            Ok(connection) => {
                let port = node.attach(connection).await?;
                component_info!("transport", "Connected to {} on port {}", addr, port);
            }
            Err(e) => component_warn!("transport", "Failed to connect to {}: {}", addr, e),
        }
    }

    let report_interval = config
        .node
        .discovery
        .as_ref()
        .map(|discovery| discovery.interval())
        .unwrap_or(DEFAULT_REPORT_INTERVAL);
    let reporter = tokio::spawn(report_routes(node.clone(), report_interval));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C, shutting down");

    reporter.abort();
    node.shutdown().await?;
    Ok(())
}

async fn declare_locators(node: &Node, config: &MeshConfig) -> anyhow::Result<()> {
    for locator in &config.locators {
        node.declare_locator(locator.protocol_id, locator.value.clone())
            .await?;
        component_info!(
            "discovery",
            "Declared locator {:?} on protocol {:#06x}",
            locator.value,
            locator.protocol_id
        );
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, node: Node) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => match node.attach(stream).await {
                Ok(port) => component_info!("transport", "Accepted {} on port {}", peer, port),
                Err(e) if e.is_pool_full() => {
                    component_warn!("transport", "Refusing {}: {}", peer, e);
                }
                Err(e) => {
                    debug!("Node closed, stopping accept loop: {}", e);
                    return;
                }
            },
            Err(e) => component_warn!("transport", "Accept failed: {}", e),
        }
    }
}

async fn report_routes(node: Node, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;

        let Ok(ports) = node.ports().await else {
            return;
        };
        let Ok(Some(discovery)) = node.discovery().await else {
            component_info!("routes", "{} links, discovery disabled", ports.len());
            continue;
        };

        let entries = discovery.snapshot().await;
        component_info!(
            "routes",
            "{} links on ports {:?}, {} known locators",
            ports.len(),
            ports,
            entries.len()
        );
        let now = unix_millis();
        for (key, entry) in entries {
            component_info!(
                "routes",
                "  {:#06x} {:?} via {} (expires in {} ms)",
                key.protocol_id,
                key.value.as_ref(),
                entry.path,
                entry.expires_at.saturating_sub(now)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "meshlink",
            "--listen",
            "127.0.0.1:9100",
            "--connect",
            "127.0.0.1:9101",
            "--locator",
            "192.168.1.10",
            "--discovery-interval",
            "250ms",
        ]);
        let mut config = MeshConfig::default();
        args.apply(&mut config);

        assert_eq!(config.listen, Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(config.connect.len(), 1);
        assert_eq!(config.locators[0].value, vec![192, 168, 1, 10]);
        assert_eq!(config.node.discovery.unwrap().interval_ms, 250);
    }

    #[test]
    fn test_no_discovery_flag() {
        let args = Args::parse_from(["meshlink", "--no-discovery"]);
        let mut config = MeshConfig::default();
        args.apply(&mut config);
        assert!(config.node.discovery.is_none());
    }

    #[tokio::test]
    async fn test_tcp_nodes_exchange_adverts() {
        let mut config = MeshConfig::default();
        config.node.discovery.as_mut().unwrap().interval_ms = 20;
        config.locators.push(LocatorConfig {
            protocol_id: 0x0800,
            value: vec![10, 0, 0, 1],
        });

        let server = Node::new(config.node.clone());
        declare_locators(&server, &config).await.unwrap();
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(accept_loop(listener, server.clone()));

        let client = Node::new(config.node.clone());
        client.attach(connect_tcp(addr).await.unwrap()).await.unwrap();

        let mut route = None;
        for _ in 0..500 {
            route = client.route_info(0x0800, &[10, 0, 0, 1]).await.unwrap();
            if route.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(route.map(|path| path.hop_count()), Some(1));

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }
}
