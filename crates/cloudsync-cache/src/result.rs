//! CacheResult: the namespaced output of one load.
//!
//! A [`CacheResult`] is what a loader produces, what an on-demand refresh
//! serializes as its payload, and what the reconciler hands back after
//! merging overrides. A namespace can be present but empty, which is how an
//! authoritative loader says "there are none" as opposed to "not mine".

use std::collections::BTreeMap;

use cloudsync_core::{EntitySnapshot, Namespace, SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Entity snapshots grouped by namespace and keyed by entity key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheResult {
    namespaces: BTreeMap<Namespace, BTreeMap<String, EntitySnapshot>>,
}

impl CacheResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `namespace` present, even if nothing is ever inserted into it.
    pub fn declare(&mut self, namespace: Namespace) -> &mut Self {
        self.namespaces.entry(namespace).or_default();
        self
    }

    /// Insert an entity, replacing any entity with the same key.
    pub fn insert(&mut self, namespace: Namespace, entity: EntitySnapshot) -> Option<EntitySnapshot> {
        self.namespaces
            .entry(namespace)
            .or_default()
            .insert(entity.key().to_string(), entity)
    }

    /// Merge an entity into an existing one with the same key, or insert it.
    ///
    /// See [`EntitySnapshot::merge_from`] for the merge rule.
    pub fn merge(&mut self, namespace: Namespace, entity: EntitySnapshot) {
        let entities = self.namespaces.entry(namespace).or_default();
        match entities.get_mut(entity.key()) {
            Some(existing) => existing.merge_from(entity),
            None => {
                entities.insert(entity.key().to_string(), entity);
            }
        }
    }

    /// Remove an entity.
    pub fn remove(&mut self, namespace: Namespace, key: &str) -> Option<EntitySnapshot> {
        self.namespaces.get_mut(&namespace)?.remove(key)
    }

    /// Look up an entity.
    #[must_use]
    pub fn get(&self, namespace: Namespace, key: &str) -> Option<&EntitySnapshot> {
        self.namespaces.get(&namespace)?.get(key)
    }

    /// Whether an entity is present.
    #[must_use]
    pub fn contains(&self, namespace: Namespace, key: &str) -> bool {
        self.get(namespace, key).is_some()
    }

    /// All entities of a namespace, `None` if the namespace is absent.
    #[must_use]
    pub fn namespace(&self, namespace: Namespace) -> Option<&BTreeMap<String, EntitySnapshot>> {
        self.namespaces.get(&namespace)
    }

    /// Whether a namespace is present (possibly empty).
    #[must_use]
    pub fn has_namespace(&self, namespace: Namespace) -> bool {
        self.namespaces.contains_key(&namespace)
    }

    /// Namespaces present in this result.
    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.namespaces.keys().copied()
    }

    /// Entities of a namespace, in key order.
    pub fn entities(&self, namespace: Namespace) -> impl Iterator<Item = &EntitySnapshot> {
        self.namespaces
            .get(&namespace)
            .into_iter()
            .flat_map(|m| m.values())
    }

    /// Number of entities in a namespace.
    #[must_use]
    pub fn len(&self, namespace: Namespace) -> usize {
        self.namespaces.get(&namespace).map_or(0, BTreeMap::len)
    }

    /// Total number of entities across namespaces.
    #[must_use]
    pub fn total_entities(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    /// Whether there are no entities at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_entities() == 0
    }

    /// Remove and return a whole namespace.
    pub fn take_namespace(&mut self, namespace: Namespace) -> Option<BTreeMap<String, EntitySnapshot>> {
        self.namespaces.remove(&namespace)
    }

    /// Fold every entity of `other` into this result with [`Self::merge`].
    pub fn merge_all(&mut self, other: CacheResult) {
        for (namespace, entities) in other.namespaces {
            let target = self.namespaces.entry(namespace).or_default();
            for (key, entity) in entities {
                match target.get_mut(&key) {
                    Some(existing) => existing.merge_from(entity),
                    None => {
                        target.insert(key, entity);
                    }
                }
            }
        }
    }

    /// Serialize for storage in an on-demand entry.
    pub fn to_payload(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::internal("encode cache result", e))
    }

    /// Decode an on-demand payload. `key` names the entry in errors.
    pub fn from_payload(key: &str, payload: &str) -> SyncResult<Self> {
        serde_json::from_str(payload).map_err(|e| SyncError::Deserialization {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}
