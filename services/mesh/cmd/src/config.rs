//! Configuration handling for the meshlink binary.
//!
//! Settings come from a YAML file, then environment variables, then command
//! line flags; each layer overrides the one before.

use anyhow::{Context, Result};
use mesh_node::{DiscoveryConfig, NodeConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

/// Environment variable overriding the listen address
pub const ENV_LISTEN: &str = "MESHLINK_LISTEN";
/// Environment variable overriding the discovery interval (milliseconds)
pub const ENV_DISCOVERY_INTERVAL_MS: &str = "MESHLINK_DISCOVERY_INTERVAL_MS";

/// A locator declared at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Protocol the locator belongs to
    #[serde(default = "default_locator_protocol")]
    pub protocol_id: u16,
    /// Locator value bytes, e.g. `[192, 168, 1, 10]`
    pub value: Vec<u8>,
}

fn default_locator_protocol() -> u16 {
    mesh_wire::DISCOVERY_PROTOCOL_ID
}

/// Meshlink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// TCP address to accept links on
    pub listen: Option<SocketAddr>,
    /// TCP peers to dial at startup
    pub connect: Vec<SocketAddr>,
    /// Locators this node owns
    pub locators: Vec<LocatorConfig>,
    /// Node settings
    pub node: NodeConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            listen: None,
            connect: Vec::new(),
            locators: Vec::new(),
            node: NodeConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing file falls back to defaults; a file that does not parse is
    /// an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = serde_yaml::from_str::<MeshConfig>(&content)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Mesh configuration: listen={:?}, connect={:?}, locators={}, discovery={}",
            config.listen,
            config.connect,
            config.locators.len(),
            config.node.discovery.is_some()
        );

        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(ENV_LISTEN) {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen = Some(addr);
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring {}={}: {}", ENV_LISTEN, listen, e),
            }
        }

        if let Some(interval) = lookup(ENV_DISCOVERY_INTERVAL_MS) {
            match interval.parse::<u64>() {
                Ok(interval_ms) => {
                    self.node
                        .discovery
                        .get_or_insert_with(DiscoveryConfig::default)
                        .interval_ms = interval_ms;
                    info!("Discovery interval overridden by environment: {} ms", interval_ms);
                }
                Err(e) => warn!("Ignoring {}={}: {}", ENV_DISCOVERY_INTERVAL_MS, interval, e),
            }
        }
    }
}
