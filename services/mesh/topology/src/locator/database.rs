//! LocatorDatabase implementation methods.

use super::{LocatorDatabase, LocatorEntry, LocatorKey, MergeStats, OwnedLocator};
use mesh_wire::{LocatorRecord, Path};
use std::collections::HashSet;
use tracing::{debug, trace};

impl LocatorDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop remotely learned entries that expired at `now`
    pub fn expire(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Expired {} locator entries", removed);
        }
        removed
    }

    /// Run one advert cycle: expire, then build the records to advertise.
    ///
    /// Self-owned locators go out with the zero-hop path and a fresh expiry;
    /// learned ones are relayed with their stored path and expiry unchanged.
    pub fn tick(&mut self, local: &[OwnedLocator], now: u64) -> Vec<LocatorRecord> {
        self.expire(now);

        let own_keys: HashSet<LocatorKey> = local.iter().map(OwnedLocator::key).collect();
        // A locator declared after it was learned remotely is ours now
        self.entries.retain(|key, _| !own_keys.contains(key));

        let mut records = Vec::with_capacity(local.len() + self.entries.len());
        for owned in local {
            let ttl = owned.locator.ttl.as_millis() as u64;
            records.push(LocatorRecord::new(
                owned.protocol_id,
                now.saturating_add(ttl),
                Path::local(),
                owned.locator.value.clone(),
            ));
        }

        let mut learned: Vec<_> = self.entries.iter().collect();
        learned.sort_by(|a, b| a.0.cmp(b.0));
        for (key, entry) in learned {
            records.push(LocatorRecord::new(
                key.protocol_id,
                entry.expires_at,
                entry.path.clone(),
                key.value.clone(),
            ));
        }

        records
    }

    /// Merge records received from a neighbor.
    ///
    /// `via` is the return path the advert arrived with; its hops are
    /// prepended to every advertised path, which is where the hop count grows.
    pub fn merge(
        &mut self,
        records: Vec<LocatorRecord>,
        via: &Path,
        local: &[OwnedLocator],
        now: u64,
    ) -> MergeStats {
        let own_keys: HashSet<LocatorKey> = local.iter().map(OwnedLocator::key).collect();
        let mut stats = MergeStats::default();

        for record in records {
            let key = LocatorKey::new(record.protocol_id, record.value);

            if record.expires_at <= now || own_keys.contains(&key) {
                stats.ignored += 1;
                continue;
            }

            let path = match record.path.prepend_hops(via.hops()) {
                Ok(path) => path,
                Err(e) => {
                    trace!("Dropping locator record: {}", e);
                    stats.ignored += 1;
                    continue;
                }
            };

            let incoming = LocatorEntry {
                path,
                expires_at: record.expires_at,
            };

            match self.entries.get_mut(&key) {
                Some(existing) if existing.is_superseded_by(&incoming) => {
                    trace!(
                        "Replacing route to {:?}: {} -> {}",
                        key.value,
                        existing.path,
                        incoming.path
                    );
                    *existing = incoming;
                    stats.replaced += 1;
                }
                Some(_) => stats.ignored += 1,
                None => {
                    debug!(
                        "Learned locator {:?} (protocol {:#06x}) via {}",
                        key.value, key.protocol_id, incoming.path
                    );
                    self.entries.insert(key, incoming);
                    stats.inserted += 1;
                }
            }
        }

        stats
    }

    /// Best known path to a remotely learned locator
    pub fn route(&self, key: &LocatorKey, now: u64) -> Option<&Path> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| &entry.path)
    }

    /// Look up the stored entry for a key
    pub fn get(&self, key: &LocatorKey) -> Option<&LocatorEntry> {
        self.entries.get(key)
    }

    /// All learned entries, sorted by key
    pub fn snapshot(&self) -> Vec<(LocatorKey, LocatorEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Forget everything learned
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of learned entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been learned
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::Locator;
    use bytes::Bytes;
    use std::time::Duration;

    const PROTO: u16 = 0x0800;

    fn path(hops: &[u8]) -> Path {
        Path::from_hops(hops).unwrap()
    }

    fn record(value: &[u8], hops: &[u8], expires_at: u64) -> LocatorRecord {
        LocatorRecord::new(PROTO, expires_at, path(hops), Bytes::copy_from_slice(value))
    }

    fn key(value: &[u8]) -> LocatorKey {
        LocatorKey::new(PROTO, Bytes::copy_from_slice(value))
    }

    fn entry(hops: &[u8], expires_at: u64) -> LocatorEntry {
        LocatorEntry {
            path: path(hops),
            expires_at,
        }
    }

    #[test]
    fn test_tie_break_rule() {
        let existing = entry(&[1, 2], 1000);

        // Shorter and not newer: replaces
        assert!(existing.is_superseded_by(&entry(&[3], 900)));
        assert!(existing.is_superseded_by(&entry(&[3], 1000)));
        // Newer and not longer: replaces
        assert!(existing.is_superseded_by(&entry(&[4, 5], 1100)));
        assert!(existing.is_superseded_by(&entry(&[3], 1100)));
        // Longer never replaces, even when newer
        assert!(!existing.is_superseded_by(&entry(&[1, 2, 3], 5000)));
        // Same length, not newer: keeps existing
        assert!(!existing.is_superseded_by(&entry(&[4, 5], 1000)));
        assert!(!existing.is_superseded_by(&entry(&[4, 5], 999)));
    }

    #[test]
    fn test_merge_prepends_return_path() {
        let mut db = LocatorDatabase::new();
        let stats = db.merge(
            vec![record(&[10, 0, 0, 2], &[], 5000), record(&[10, 0, 0, 3], &[4], 5000)],
            &path(&[2]),
            &[],
            1000,
        );
        assert_eq!(stats.inserted, 2);
        assert_eq!(db.route(&key(&[10, 0, 0, 2]), 1000), Some(&path(&[2])));
        assert_eq!(db.route(&key(&[10, 0, 0, 3]), 1000), Some(&path(&[2, 4])));
    }

    #[test]
    fn test_identical_advert_is_idempotent() {
        let mut db = LocatorDatabase::new();
        let advert = vec![record(&[1], &[], 5000)];
        db.merge(advert.clone(), &path(&[1]), &[], 1000);
        let before = db.get(&key(&[1])).cloned();

        let stats = db.merge(advert, &path(&[1]), &[], 1200);
        assert_eq!(stats, MergeStats { inserted: 0, replaced: 0, ignored: 1 });
        assert_eq!(db.get(&key(&[1])).cloned(), before);
    }

    #[test]
    fn test_longer_path_waits_for_expiry() {
        let mut db = LocatorDatabase::new();
        db.merge(vec![record(&[7], &[], 2000)], &path(&[1]), &[], 1000);
        db.merge(vec![record(&[7], &[9], 9000)], &path(&[2]), &[], 1000);
        assert_eq!(db.route(&key(&[7]), 1000), Some(&path(&[1])));

        // Direct advert stops arriving; once it expires the longer path is accepted
        db.expire(2000);
        assert_eq!(db.route(&key(&[7]), 2000), None);
        db.merge(vec![record(&[7], &[9], 9000)], &path(&[2]), &[], 2000);
        assert_eq!(db.route(&key(&[7]), 2000), Some(&path(&[2, 9])));
    }

    #[test]
    fn test_expired_and_self_owned_records_are_dropped() {
        let mut db = LocatorDatabase::new();
        let local = vec![OwnedLocator::new(PROTO, Locator::new(vec![1u8], Duration::from_secs(30)))];

        let stats = db.merge(
            vec![record(&[1], &[], 5000), record(&[2], &[], 999)],
            &path(&[1]),
            &local,
            1000,
        );
        assert_eq!(stats.ignored, 2);
        assert!(db.is_empty());
    }

    #[test]
    fn test_tick_builds_advert() {
        let mut db = LocatorDatabase::new();
        db.merge(vec![record(&[2], &[], 3000)], &path(&[1]), &[], 1000);
        db.merge(vec![record(&[3], &[], 1500)], &path(&[1]), &[], 1000);

        let local = vec![OwnedLocator::new(PROTO, Locator::new(vec![1u8], Duration::from_secs(10)))];
        let records = db.tick(&local, 2000);

        assert_eq!(
            records,
            vec![
                record(&[1], &[], 12_000),
                record(&[2], &[1], 3000),
            ]
        );
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_declared_locator_purges_learned_entry() {
        let mut db = LocatorDatabase::new();
        db.merge(vec![record(&[5], &[], 9000)], &path(&[1]), &[], 1000);

        let local = vec![OwnedLocator::new(PROTO, Locator::new(vec![5u8], Duration::from_secs(1)))];
        let records = db.tick(&local, 1000);
        assert_eq!(records.len(), 1);
        assert!(records[0].path.is_local());
        assert!(db.is_empty());
    }
}
