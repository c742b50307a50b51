//! # nebucloud-cloudsync
//!
//! Keeps a local, read-optimized view of a cloud account's resources in
//! step with the remote side.
//!
//! - Full scans per (account, region) replace cached namespaces wholesale
//! - On-demand refreshes make a just-mutated resource visible before the
//!   next scan
//! - A timestamp rule decides whether each refresh is merged into the next
//!   scan or evicted as stale
//! - Declarative load balancer upserts diff the desired listener tree
//!   against the remote one and trigger a refresh when done
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nebucloud_cloudsync::prelude::*;
//!
//! let cache = Arc::new(ProviderCache::new());
//! let pipeline = Arc::new(Pipeline::new(Scope::new("prod", "ap-guangzhou"), cache.clone(), lister));
//!
//! // One full scan.
//! let report = pipeline.run_cycle().await;
//! assert_eq!(report.failures(), 0);
//!
//! // Point refresh after a change.
//! pipeline.handle_on_demand_key("lb:prod:ap-guangzhou:lb-1").await?;
//!
//! // Or run every pipeline periodically.
//! let scheduler = Scheduler::from_config(&config, vec![pipeline])?;
//! ```
//!
//! ## Architecture
//!
//! - `cloudsync-core` - Keys, entities, errors and the remote traits
//! - `cloudsync-cache` - Namespaced store, on-demand store, reconciler
//! - `cloudsync-agent` - Loaders, pipelines and the scheduler
//! - `cloudsync-lb` - Listener diffing and the load balancer upsert
//!
//! This crate re-exports all public APIs for convenience.
//!
//! ## Design Principles
//!
//! 1. **No panics in library code** - All errors are returned as `Result`
//! 2. **Readers never block** - Namespaces are swapped as whole `Arc`s
//! 3. **Scopes are independent** - One pipeline per (account, region)
//! 4. **Observable** - Built-in metrics and tracing support

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use cloudsync_agent as agent;
pub use cloudsync_cache as cache;
pub use cloudsync_core as core;
pub use cloudsync_lb as lb;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use nebucloud_cloudsync::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use cloudsync_core::{
        Clock, EntitySnapshot, L4Protocol, L7Protocol, Listener, ManualClock, Namespace,
        NullSink, RemoteLister, RemoteMutator, Rule, Scope, StatusSink, SyncError, SyncResult,
        SystemClock, Target, TaskLog, Timestamp,
    };

    // Cache types
    pub use cloudsync_cache::{Cache, CacheResult, CacheStats, OnDemandStore, ProviderCache};

    // Agent types
    pub use cloudsync_agent::{
        CachingAgent, CycleReport, OnDemandAgent, OnDemandKind, OnDemandRequest, Pipeline,
        Scheduler, SyncConfig,
    };

    // Load balancer types
    pub use cloudsync_lb::{
        LoadBalancerUpserter, OnDemandTrigger, TaskPoller, UpsertLoadBalancerRequest,
        UpsertOutcome,
    };
}

/// Version information for this crate.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Minimum supported Rust version.
    pub const MSRV: &str = "1.75";

    /// Get version info as a string.
    pub fn version_string() -> String {
        format!("nebucloud-cloudsync {} (MSRV {})", VERSION, MSRV)
    }
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn prelude_imports_work() {
        let cache = ProviderCache::new();
        let mut entities = BTreeMap::new();
        entities.insert("app:web".to_string(), EntitySnapshot::placeholder("app:web"));

        cache.install(Namespace::Applications, entities);

        assert!(cache.get(Namespace::Applications, "app:web").is_some());
        assert_eq!(cache.entity_count(), 1);
    }

    #[test]
    fn config_builder_works() {
        let config = SyncConfig::new().account("prod", ["region1", "region2"]);

        assert!(config.validate().is_ok());
        assert_eq!(config.scopes().len(), 2);
    }

    #[tokio::test]
    async fn pipeline_scans_into_cache() {
        let scope = Scope::new("prod", "region1");
        let cloud = Arc::new(cloudsync_testing::InMemoryCloud::new());
        let cache = Arc::new(ProviderCache::new());
        let pipeline = Pipeline::new(scope, cache.clone(), cloud);

        let report = pipeline.run_cycle().await;

        assert_eq!(report.failures(), 0);
        assert_eq!(pipeline.agent_types().len(), 9);
        assert!(cache.namespaces().contains(&Namespace::ServerGroups));
    }

    #[test]
    fn version_info() {
        let version = super::version::version_string();
        assert!(version.contains("nebucloud-cloudsync"));
    }
}
