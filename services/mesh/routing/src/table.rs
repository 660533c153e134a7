//! Port table: small integer handles for attached links

use std::collections::BTreeMap;
use tracing::debug;

/// Lowest assignable port
pub const MIN_PORT: u8 = 1;
/// Highest assignable port
pub const MAX_PORT: u8 = 255;
/// Number of links a node can hold at once
pub const MAX_PORTS: usize = 255;

/// Links keyed by port number; port `0` is reserved for "this node"
#[derive(Debug)]
pub struct PortTable<L> {
    slots: BTreeMap<u8, L>,
}

impl<L> PortTable<L> {
    /// Create an empty port table
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Smallest unused port, or `None` when the pool is full
    pub fn next_free_port(&self) -> Option<u8> {
        (MIN_PORT..=MAX_PORT).find(|port| !self.slots.contains_key(port))
    }

    /// Allocate the smallest unused port and store the link built for it
    pub fn insert_with<F>(&mut self, build: F) -> Option<u8>
    where
        F: FnOnce(u8) -> L,
    {
        let port = self.next_free_port()?;
        self.slots.insert(port, build(port));
        debug!("Assigned port {} ({} in use)", port, self.slots.len());
        Some(port)
    }

    /// Look up a link
    pub fn get(&self, port: u8) -> Option<&L> {
        self.slots.get(&port)
    }

    /// Remove a link; `None` if it was already gone
    pub fn remove(&mut self, port: u8) -> Option<L> {
        let removed = self.slots.remove(&port);
        if removed.is_some() {
            debug!("Released port {} ({} in use)", port, self.slots.len());
        }
        removed
    }

    /// Live ports in ascending order
    pub fn ports(&self) -> Vec<u8> {
        self.slots.keys().copied().collect()
    }

    /// Iterate over live links
    pub fn iter(&self) -> impl Iterator<Item = (u8, &L)> {
        self.slots.iter().map(|(&port, link)| (port, link))
    }

    /// Remove and return every link
    pub fn drain(&mut self) -> Vec<(u8, L)> {
        std::mem::take(&mut self.slots).into_iter().collect()
    }

    /// Number of live links
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no link is attached
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether every port is in use
    pub fn is_full(&self) -> bool {
        self.slots.len() >= MAX_PORTS
    }
}

impl<L> Default for PortTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_free_port() {
        let mut table = PortTable::new();
        assert_eq!(table.insert_with(|p| p), Some(1));
        assert_eq!(table.insert_with(|p| p), Some(2));
        assert_eq!(table.insert_with(|p| p), Some(3));

        assert_eq!(table.remove(2), Some(2));
        assert_eq!(table.remove(2), None);
        assert_eq!(table.insert_with(|p| p), Some(2));
        assert_eq!(table.ports(), vec![1, 2, 3]);
    }

    #[test]
    fn test_pool_full() {
        let mut table = PortTable::new();
        for expected in MIN_PORT..=MAX_PORT {
            assert_eq!(table.insert_with(|p| p), Some(expected));
        }
        assert!(table.is_full());
        assert_eq!(table.len(), MAX_PORTS);

        assert_eq!(table.insert_with(|_| unreachable!()), None);
        assert_eq!(table.len(), MAX_PORTS);
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn test_drain() {
        let mut table = PortTable::new();
        table.insert_with(|p| p * 10);
        table.insert_with(|p| p * 10);
        assert_eq!(table.drain(), vec![(1, 10), (2, 20)]);
        assert!(table.is_empty());
    }
}
