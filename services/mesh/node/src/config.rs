//! Node configuration.

use mesh_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Advert interval (milliseconds)
    pub interval_ms: u64,
    /// Lifetime advertised for locators declared without one (milliseconds)
    pub locator_ttl_ms: u64,
}

impl DiscoveryConfig {
    /// Advert interval
    pub fn interval(&self) -> Duration {
        // Zero would make the ticker panic
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// Lifetime advertised for locators declared without one
    pub fn locator_ttl(&self) -> Duration {
        Duration::from_millis(self.locator_ttl_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            locator_ttl_ms: 30_000,
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Discovery settings; `None` disables the built-in discovery handler
    pub discovery: Option<DiscoveryConfig>,
    /// Outbound messages buffered per link
    pub link_queue_depth: usize,
}

impl NodeConfig {
    /// Configuration with discovery disabled
    pub fn without_discovery() -> Self {
        Self {
            discovery: None,
            ..Self::default()
        }
    }

    /// Session settings derived from this configuration
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            queue_depth: self.link_queue_depth.max(1),
            ..SessionConfig::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            discovery: Some(DiscoveryConfig::default()),
            link_queue_depth: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        let discovery = config.discovery.clone().unwrap();
        assert_eq!(discovery.interval(), Duration::from_secs(5));
        assert_eq!(discovery.locator_ttl(), Duration::from_secs(30));
        assert_eq!(config.session().queue_depth, 1024);
    }

    #[test]
    fn test_yaml_partial_and_disabled() {
        let config: NodeConfig = serde_yaml::from_str("discovery:\n  interval_ms: 250\n").unwrap();
        let discovery = config.discovery.unwrap();
        assert_eq!(discovery.interval(), Duration::from_millis(250));
        assert_eq!(discovery.locator_ttl_ms, 30_000);
        assert_eq!(config.link_queue_depth, 1024);

        let config: NodeConfig = serde_yaml::from_str("discovery: null\n").unwrap();
        assert!(config.discovery.is_none());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let discovery = DiscoveryConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(discovery.interval(), Duration::from_millis(1));
    }
}
