//! Cache trait and ProviderCache implementation.
//!
//! The cache stores one [`NamespaceData`] per namespace behind an `Arc`.
//! Writers build a complete replacement off to the side and publish it with
//! a single insert, so a reader holding an `Arc` always sees one cycle's
//! worth of a namespace, never a half-populated one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cloudsync_core::{EntitySnapshot, Namespace, Timestamp};
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::on_demand::OnDemandStore;
use crate::stats::CacheStats;

/// Relationship edges contributed by one loader, keyed by entity key.
pub type EdgeSet = BTreeMap<String, BTreeMap<Namespace, BTreeSet<String>>>;

/// Everything the cache holds for one namespace.
#[derive(Clone, Debug, Default)]
pub struct NamespaceData {
    entities: BTreeMap<String, EntitySnapshot>,
    edges: BTreeMap<String, Arc<EdgeSet>>,
    installed_at: Option<Timestamp>,
}

impl NamespaceData {
    /// Entities installed by the owning loader.
    #[must_use]
    pub fn entities(&self) -> &BTreeMap<String, EntitySnapshot> {
        &self.entities
    }

    /// Informative edges by contributing source.
    #[must_use]
    pub fn edges(&self) -> &BTreeMap<String, Arc<EdgeSet>> {
        &self.edges
    }

    /// When the entities were last installed.
    #[must_use]
    pub fn installed_at(&self) -> Option<Timestamp> {
        self.installed_at
    }

    /// An entity with every contributed edge folded in.
    fn resolve(&self, key: &str) -> Option<EntitySnapshot> {
        let mut entity = self.entities.get(key)?.clone();
        for edges in self.edges.values() {
            if let Some(relationships) = edges.get(key) {
                for (namespace, keys) in relationships {
                    entity.add_relationships(*namespace, keys.iter().cloned());
                }
            }
        }
        Some(entity)
    }
}

/// Trait for namespaced entity caches.
pub trait Cache: Send + Sync {
    /// Get one entity, with informative edges merged in.
    fn get(&self, namespace: Namespace, key: &str) -> Option<EntitySnapshot>;

    /// Replace every entity of a namespace at once.
    fn install(&self, namespace: Namespace, entities: BTreeMap<String, EntitySnapshot>);

    /// Replace the edges one source contributes to a namespace it does not own.
    fn contribute(&self, namespace: Namespace, source: &str, edges: EdgeSet);

    /// Remove entities from a namespace. Returns how many were present.
    fn evict(&self, namespace: Namespace, keys: &[String]) -> usize;

    /// Total number of installed entities.
    fn entity_count(&self) -> usize;
}

/// Namespaced cache for one (account, region) pipeline.
///
/// Reads go through `DashMap` shard read locks that are released as soon as
/// the namespace `Arc` has been cloned. The `on-demand` namespace lives in a
/// separate [`OnDemandStore`] with its own per-key write discipline.
#[derive(Debug, Default)]
pub struct ProviderCache {
    namespaces: DashMap<Namespace, Arc<NamespaceData>>,
    on_demand: OnDemandStore,
    stats: CacheStats,
}

impl ProviderCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The on-demand store.
    #[inline]
    pub fn on_demand(&self) -> &OnDemandStore {
        &self.on_demand
    }

    /// Cache statistics.
    #[inline]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The current data of a namespace.
    pub fn namespace(&self, namespace: Namespace) -> Option<Arc<NamespaceData>> {
        self.namespaces.get(&namespace).map(|r| Arc::clone(&*r))
    }

    /// Namespaces that have data.
    pub fn namespaces(&self) -> Vec<Namespace> {
        let mut out: Vec<Namespace> = self.namespaces.iter().map(|r| *r.key()).collect();
        out.sort();
        out
    }

    /// Every entity of a namespace, in key order.
    pub fn get_all(&self, namespace: Namespace) -> Vec<EntitySnapshot> {
        let Some(data) = self.namespace(namespace) else {
            return Vec::new();
        };
        data.entities
            .keys()
            .filter_map(|key| data.resolve(key))
            .collect()
    }

    /// Keys of a namespace, in order.
    pub fn keys(&self, namespace: Namespace) -> Vec<String> {
        self.namespace(namespace)
            .map(|data| data.entities.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether an entity is installed.
    pub fn contains(&self, namespace: Namespace, key: &str) -> bool {
        self.namespaces
            .get(&namespace)
            .is_some_and(|data| data.entities.contains_key(key))
    }

    /// Follow the edges of `key` into `target` and return the entities found.
    ///
    /// Edges to keys that are not installed are skipped.
    pub fn related(&self, namespace: Namespace, key: &str, target: Namespace) -> Vec<EntitySnapshot> {
        let Some(entity) = self.get(namespace, key) else {
            return Vec::new();
        };
        let Some(data) = self.namespace(target) else {
            return Vec::new();
        };
        entity
            .related(target)
            .filter_map(|related| data.resolve(related))
            .collect()
    }

    /// Install at an explicit time; `install` uses no timestamp.
    pub fn install_at(
        &self,
        namespace: Namespace,
        entities: BTreeMap<String, EntitySnapshot>,
        installed_at: Option<Timestamp>,
    ) {
        let count = entities.len();
        {
            let mut slot = self.namespaces.entry(namespace).or_default();
            let edges = slot.edges.clone();
            *slot = Arc::new(NamespaceData {
                entities,
                edges,
                installed_at,
            });
        }
        self.stats.record_install();

        debug!(namespace = %namespace, entities = count, "installed namespace");
    }
}

impl Cache for ProviderCache {
    fn get(&self, namespace: Namespace, key: &str) -> Option<EntitySnapshot> {
        let result = self.namespace(namespace).and_then(|data| data.resolve(key));

        if result.is_some() {
            self.stats.record_hit();
            trace!(namespace = %namespace, key, "cache hit");
        } else {
            self.stats.record_miss();
            trace!(namespace = %namespace, key, "cache miss");
        }

        result
    }

    fn install(&self, namespace: Namespace, entities: BTreeMap<String, EntitySnapshot>) {
        self.install_at(namespace, entities, None);
    }

    fn contribute(&self, namespace: Namespace, source: &str, edges: EdgeSet) {
        let edges = Arc::new(edges);
        let mut slot = self.namespaces.entry(namespace).or_default();
        let mut data = NamespaceData::clone(&slot);
        if edges.is_empty() {
            data.edges.remove(source);
        } else {
            data.edges.insert(source.to_string(), Arc::clone(&edges));
        }
        *slot = Arc::new(data);

        trace!(namespace = %namespace, source, keys = edges.len(), "replaced contributed edges");
    }

    fn evict(&self, namespace: Namespace, keys: &[String]) -> usize {
        let Some(mut slot) = self.namespaces.get_mut(&namespace) else {
            return 0;
        };
        if !keys.iter().any(|key| slot.entities.contains_key(key)) {
            return 0;
        }

        let mut data = NamespaceData::clone(&slot);
        let removed = keys
            .iter()
            .filter(|key| data.entities.remove(key.as_str()).is_some())
            .count();
        *slot = Arc::new(data);
        drop(slot);

        self.stats.record_evictions(removed as u64);
        debug!(namespace = %namespace, removed, "evicted entities");
        removed
    }

    fn entity_count(&self) -> usize {
        self.namespaces.iter().map(|r| r.entities.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_core::entity::ApplicationAttributes;
    use cloudsync_core::Attributes;

    fn app(name: &str) -> EntitySnapshot {
        EntitySnapshot::new(
            format!("app:{name}"),
            Attributes::Application(ApplicationAttributes {
                name: name.to_string(),
            }),
        )
    }

    fn entities(items: Vec<EntitySnapshot>) -> BTreeMap<String, EntitySnapshot> {
        items
            .into_iter()
            .map(|e| (e.key().to_string(), e))
            .collect()
    }

    #[test]
    fn install_and_get() {
        let cache = ProviderCache::new();
        cache.install(Namespace::Applications, entities(vec![app("web")]));

        assert!(cache.get(Namespace::Applications, "app:web").is_some());
        assert!(cache.get(Namespace::Applications, "app:api").is_none());
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.entity_count(), 1);
    }

    #[test]
    fn install_replaces_namespace_wholesale() {
        let cache = ProviderCache::new();
        cache.install(Namespace::Applications, entities(vec![app("web"), app("api")]));
        cache.install(Namespace::Applications, entities(vec![app("api")]));

        assert_eq!(cache.keys(Namespace::Applications), vec!["app:api".to_string()]);
    }

    #[test]
    fn reader_snapshot_is_unaffected_by_later_install() {
        let cache = ProviderCache::new();
        cache.install(Namespace::Applications, entities(vec![app("web")]));

        let before = cache.namespace(Namespace::Applications).unwrap();
        cache.install(Namespace::Applications, entities(vec![app("api"), app("db")]));

        assert_eq!(before.entities().len(), 1);
        assert!(before.entities().contains_key("app:web"));
        assert_eq!(cache.keys(Namespace::Applications).len(), 2);
    }

    #[test]
    fn contributed_edges_are_merged_on_read_and_survive_install() {
        let cache = ProviderCache::new();
        cache.install(Namespace::Applications, entities(vec![app("web")]));

        let mut edges = EdgeSet::new();
        edges
            .entry("app:web".to_string())
            .or_default()
            .entry(Namespace::LoadBalancers)
            .or_default()
            .insert("lb:prod:r1:lb-1".to_string());
        cache.contribute(Namespace::Applications, "LoadBalancerLoader", edges);

        let web = cache.get(Namespace::Applications, "app:web").unwrap();
        assert_eq!(web.related(Namespace::LoadBalancers).count(), 1);

        cache.install(Namespace::Applications, entities(vec![app("web")]));
        let web = cache.get(Namespace::Applications, "app:web").unwrap();
        assert_eq!(web.related(Namespace::LoadBalancers).count(), 1);

        cache.contribute(Namespace::Applications, "LoadBalancerLoader", EdgeSet::new());
        let web = cache.get(Namespace::Applications, "app:web").unwrap();
        assert_eq!(web.related(Namespace::LoadBalancers).count(), 0);
    }

    #[test]
    fn related_follows_edges_by_lookup() {
        let cache = ProviderCache::new();
        cache.install(
            Namespace::Applications,
            entities(vec![app("web")
                .with_relationship(Namespace::Clusters, "cluster:prod:web:web")
                .with_relationship(Namespace::Clusters, "cluster:prod:web:web-gone")]),
        );
        cache.install(
            Namespace::Clusters,
            entities(vec![EntitySnapshot::placeholder("cluster:prod:web:web")]),
        );

        let clusters = cache.related(Namespace::Applications, "app:web", Namespace::Clusters);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].key(), "cluster:prod:web:web");
    }

    #[test]
    fn evict_removes_only_named_keys() {
        let cache = ProviderCache::new();
        cache.install(Namespace::Applications, entities(vec![app("web"), app("api")]));

        assert_eq!(cache.evict(Namespace::Applications, &["app:web".to_string()]), 1);
        assert_eq!(cache.evict(Namespace::Applications, &["app:web".to_string()]), 0);
        assert_eq!(cache.evict(Namespace::Instances, &["inst:a:r:i-1".to_string()]), 0);

        assert!(!cache.contains(Namespace::Applications, "app:web"));
        assert!(cache.contains(Namespace::Applications, "app:api"));
        assert_eq!(cache.stats().entities_evicted(), 1);
    }
}
