//! Locator table types for path-vector discovery.

use bytes::Bytes;
use mesh_wire::Path;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default lifetime of an advertised self-owned locator
pub const DEFAULT_LOCATOR_TTL: Duration = Duration::from_secs(30);

/// A locator owned by this node: refreshed on every advert
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    /// How long receivers may keep the advert
    pub ttl: Duration,
    /// Opaque locator value (service identity)
    pub value: Bytes,
}

impl Locator {
    /// Create a locator with the given lifetime
    pub fn new(value: impl Into<Bytes>, ttl: Duration) -> Self {
        Self {
            ttl,
            value: value.into(),
        }
    }
}

/// A self-owned locator together with its protocol id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnedLocator {
    /// Protocol the locator belongs to
    pub protocol_id: u16,
    /// The locator
    pub locator: Locator,
}

impl OwnedLocator {
    /// Create a new owned locator
    pub fn new(protocol_id: u16, locator: Locator) -> Self {
        Self {
            protocol_id,
            locator,
        }
    }

    /// Table key of this locator
    pub fn key(&self) -> LocatorKey {
        LocatorKey::new(self.protocol_id, self.locator.value.clone())
    }
}

/// Identity of a locator: at most one table entry exists per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocatorKey {
    /// Protocol id
    pub protocol_id: u16,
    /// Locator value
    pub value: Bytes,
}

impl LocatorKey {
    /// Create a new key
    pub fn new(protocol_id: u16, value: impl Into<Bytes>) -> Self {
        Self {
            protocol_id,
            value: value.into(),
        }
    }
}

/// A remotely learned locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorEntry {
    /// Path from this node to the locator owner
    pub path: Path,
    /// Absolute expiry, milliseconds since the Unix epoch
    pub expires_at: u64,
}

impl LocatorEntry {
    /// Whether the entry has expired at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Whether `incoming` should replace this entry.
    ///
    /// A strictly shorter path wins unless it is also newer (then the second
    /// rule applies anyway); a newer expiry wins unless its path is longer.
    /// Equal paths with equal expiry never replace, so repeated adverts cause
    /// no churn.
    pub fn is_superseded_by(&self, incoming: &LocatorEntry) -> bool {
        let shorter = incoming.path.len() < self.path.len();
        let not_longer = incoming.path.len() <= self.path.len();
        let newer = incoming.expires_at > self.expires_at;
        (shorter && !newer) || (newer && not_longer)
    }
}

/// Result of merging one advert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// New keys learned
    pub inserted: usize,
    /// Existing entries replaced by a better path
    pub replaced: usize,
    /// Records dropped or not better than what is known
    pub ignored: usize,
}

/// Path-vector locator database
#[derive(Debug, Default)]
pub struct LocatorDatabase {
    /// Remotely learned locators
    entries: HashMap<LocatorKey, LocatorEntry>,
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// Include implementation
mod database;
