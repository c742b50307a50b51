//! The `on-demand` namespace.
//!
//! On-demand entries are point refreshes written right after a remote
//! mutation. They are the only cache data written by two parties: the
//! refresh path (which [`put`](OnDemandStore::put)s) and the reconciler
//! (which keeps or evicts). Both go through per-key compare-and-swap on a
//! store-assigned generation, so an eviction decided for an old entry never
//! removes a newer refresh written for the same key in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cloudsync_core::{Namespace, SyncResult, Timestamp};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::result::CacheResult;

/// A point-in-time refresh of one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnDemandEntry {
    /// Key of the refreshed resource.
    pub key: String,
    /// Authoritative namespace of the refreshed resource.
    pub namespace: Namespace,
    /// When the payload was read from the remote side.
    pub captured_at: Timestamp,
    /// How many reconcile passes kept this entry.
    pub processed_count: u32,
    /// When the last reconcile pass kept this entry.
    pub processed_at: Option<Timestamp>,
    /// Serialized [`CacheResult`].
    pub payload: String,
    /// Assigned by the store on write; identifies this exact write.
    pub generation: u64,
}

impl OnDemandEntry {
    /// Build an unprocessed entry from a freshly loaded result.
    pub fn new(
        key: impl Into<String>,
        namespace: Namespace,
        captured_at: Timestamp,
        result: &CacheResult,
    ) -> SyncResult<Self> {
        Ok(Self {
            key: key.into(),
            namespace,
            captured_at,
            processed_count: 0,
            processed_at: None,
            payload: result.to_payload()?,
            generation: 0,
        })
    }

    /// Build an entry around an already serialized payload.
    pub fn with_payload(
        key: impl Into<String>,
        namespace: Namespace,
        captured_at: Timestamp,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            namespace,
            captured_at,
            processed_count: 0,
            processed_at: None,
            payload: payload.into(),
            generation: 0,
        }
    }

    /// Set the processed count.
    #[must_use]
    pub fn processed(mut self, count: u32) -> Self {
        self.processed_count = count;
        self
    }

    /// Decode the payload.
    pub fn decode(&self) -> SyncResult<CacheResult> {
        CacheResult::from_payload(&self.key, &self.payload)
    }
}

/// Diagnostic view of an outstanding on-demand entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOnDemand {
    /// Key of the refreshed resource.
    pub key: String,
    /// Authoritative namespace.
    pub namespace: Namespace,
    /// Capture time.
    pub captured_at: Timestamp,
    /// Reconcile passes that kept the entry.
    pub processed_count: u32,
    /// Time since capture.
    #[serde(serialize_with = "as_millis")]
    pub age: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Concurrent store of on-demand entries, keyed by resource key.
#[derive(Debug, Default)]
pub struct OnDemandStore {
    entries: DashMap<String, OnDemandEntry>,
    generations: AtomicU64,
}

impl OnDemandStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an entry, replacing any entry for the same key.
    ///
    /// Returns the generation assigned to the write.
    pub fn put(&self, mut entry: OnDemandEntry) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        entry.generation = generation;
        debug!(
            key = %entry.key,
            namespace = %entry.namespace,
            captured_at = %entry.captured_at,
            generation,
            "stored on-demand entry"
        );
        self.entries.insert(entry.key.clone(), entry);
        generation
    }

    /// Look up the current entry for a key.
    pub fn get(&self, key: &str) -> Option<OnDemandEntry> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    /// Snapshot of the entries whose namespace is one of `namespaces`.
    pub fn entries_for(&self, namespaces: &[Namespace]) -> Vec<OnDemandEntry> {
        let mut out: Vec<OnDemandEntry> = self
            .entries
            .iter()
            .filter(|r| namespaces.contains(&r.value().namespace))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Snapshot of every entry.
    pub fn all(&self) -> Vec<OnDemandEntry> {
        let mut out: Vec<OnDemandEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Record that a reconcile pass kept the entry written as `generation`.
    ///
    /// Does nothing, and returns `false`, if the key has been rewritten or
    /// removed since. The capture time is never touched.
    pub fn mark_processed(&self, key: &str, generation: u64, processed_at: Timestamp) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.generation == generation => {
                entry.processed_count += 1;
                entry.processed_at = Some(processed_at);
                true
            }
            _ => {
                trace!(key, generation, "on-demand entry superseded before mark");
                false
            }
        }
    }

    /// Remove the entry for `key` only if it is still the write `generation`.
    pub fn evict_if(&self, key: &str, generation: u64) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.generation == generation)
            .is_some();
        if !removed {
            trace!(key, generation, "on-demand entry superseded before evict");
        }
        removed
    }

    /// Remove the entry for `key` unconditionally.
    pub fn remove(&self, key: &str) -> Option<OnDemandEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Outstanding entries with their age relative to `now`, oldest first.
    pub fn pending(&self, now: Timestamp) -> Vec<PendingOnDemand> {
        let mut out: Vec<PendingOnDemand> = self
            .entries
            .iter()
            .map(|r| {
                let e = r.value();
                PendingOnDemand {
                    key: e.key.clone(),
                    namespace: e.namespace,
                    captured_at: e.captured_at,
                    processed_count: e.processed_count,
                    age: now.saturating_since(e.captured_at),
                }
            })
            .collect();
        out.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.key.cmp(&b.key)));
        out
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn entry(key: &str, captured_at: u64) -> OnDemandEntry {
        OnDemandEntry::with_payload(
            key,
            Namespace::SecurityGroups,
            Timestamp::from_millis(captured_at),
            "{}",
        )
    }

    #[test]
    fn put_replaces_and_assigns_generation() {
        let store = OnDemandStore::new();
        let g1 = store.put(entry("sg:a:r:sg-1", 100));
        let g2 = store.put(entry("sg:a:r:sg-1", 200));

        assert!(g2 > g1);
        assert_eq!(store.len(), 1);
        let current = store.get("sg:a:r:sg-1").unwrap();
        assert_eq!(current.captured_at, Timestamp::from_millis(200));
        assert_eq!(current.generation, g2);
    }

    #[test]
    fn mark_processed_increments_only_matching_generation() {
        let store = OnDemandStore::new();
        let g1 = store.put(entry("sg:a:r:sg-1", 100));

        assert!(store.mark_processed("sg:a:r:sg-1", g1, Timestamp::from_millis(150)));
        let e = store.get("sg:a:r:sg-1").unwrap();
        assert_eq!(e.processed_count, 1);
        assert_eq!(e.captured_at, Timestamp::from_millis(100));
        assert_eq!(e.processed_at, Some(Timestamp::from_millis(150)));

        let g2 = store.put(entry("sg:a:r:sg-1", 300));
        assert!(!store.mark_processed("sg:a:r:sg-1", g1, Timestamp::from_millis(350)));
        assert_eq!(store.get("sg:a:r:sg-1").unwrap().processed_count, 0);
        assert!(store.mark_processed("sg:a:r:sg-1", g2, Timestamp::from_millis(350)));
    }

    #[test]
    fn evict_if_spares_newer_refresh() {
        let store = OnDemandStore::new();
        let stale = store.put(entry("sg:a:r:sg-1", 100));
        let fresh = store.put(entry("sg:a:r:sg-1", 500));

        assert!(!store.evict_if("sg:a:r:sg-1", stale));
        assert_eq!(store.get("sg:a:r:sg-1").unwrap().generation, fresh);

        assert!(store.evict_if("sg:a:r:sg-1", fresh));
        assert!(store.is_empty());
    }

    #[test]
    fn entries_for_filters_by_namespace() {
        let store = OnDemandStore::new();
        store.put(entry("sg:a:r:sg-2", 100));
        store.put(entry("sg:a:r:sg-1", 100));
        store.put(OnDemandEntry::with_payload(
            "lb:a:r:lb-1",
            Namespace::LoadBalancers,
            Timestamp::from_millis(100),
            "{}",
        ));

        let sgs = store.entries_for(&[Namespace::SecurityGroups]);
        assert_eq!(sgs.len(), 2);
        assert_eq!(sgs[0].key, "sg:a:r:sg-1");
        assert_eq!(store.all().len(), 3);
    }

    #[test]
    fn pending_reports_age() {
        let store = OnDemandStore::new();
        store.put(entry("sg:a:r:sg-1", 1_000));
        store.put(entry("sg:a:r:sg-0", 2_000));

        let pending = store.pending(Timestamp::from_millis(4_000));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].key, "sg:a:r:sg-1");
        assert_eq!(pending[0].age, Duration::from_secs(3));
        assert_eq!(pending[1].processed_count, 0);
    }

    #[test]
    fn concurrent_refresh_and_evict_never_lose_the_refresh() {
        let store = Arc::new(OnDemandStore::new());
        let key = "sg:a:r:sg-1";

        for round in 0..200u64 {
            let stale = store.put(entry(key, round));

            let writer = {
                let store = Arc::clone(&store);
                thread::spawn(move || store.put(entry(key, round + 1_000)))
            };
            let evictor = {
                let store = Arc::clone(&store);
                thread::spawn(move || store.evict_if(key, stale))
            };

            let fresh = writer.join().expect("writer panicked");
            evictor.join().expect("evictor panicked");

            let current = store.get(key).expect("fresh refresh must survive");
            assert_eq!(current.generation, fresh);
        }
    }
}
