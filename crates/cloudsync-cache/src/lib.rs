//! # cloudsync-cache
//!
//! Namespaced entity cache and on-demand reconciliation.
//!
//! This crate provides the storage side of a synchronization pipeline:
//!
//! - [`CacheResult`] - The namespaced output of one load or refresh
//! - [`ProviderCache`] - Concurrent store with per-namespace atomic replacement
//! - [`OnDemandStore`] - Point refreshes awaiting the next full scan
//! - [`reconcile`] - Merge kept refreshes into a scan, evict stale ones
//!
//! ## Key Design Decisions
//!
//! - Each namespace is published as one `Arc`, replaced with a single insert
//! - Relationship edges are key sets; traversal is always a lookup
//! - On-demand writes and evictions compare a store-assigned generation
//! - `DashMap` references are never held across calls that take other locks
//!
//! ## Example
//!
//! ```rust
//! use cloudsync_cache::{reconcile, CacheResult, OnDemandEntry, ProviderCache};
//! use cloudsync_core::{Namespace, Timestamp};
//!
//! let cache = ProviderCache::new();
//! let mut refreshed = CacheResult::new();
//! refreshed.declare(Namespace::SecurityGroups);
//!
//! let entry = OnDemandEntry::new(
//!     "sg:prod:r1:sg-1",
//!     Namespace::SecurityGroups,
//!     Timestamp::from_millis(100),
//!     &refreshed,
//! )
//! .unwrap();
//! cache.on_demand().put(entry);
//!
//! let pending = cache.on_demand().entries_for(&[Namespace::SecurityGroups]);
//! let out = reconcile(Timestamp::from_millis(90), CacheResult::new(), pending);
//! assert_eq!(out.kept.len(), 1);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod on_demand;
mod reconcile;
mod result;
mod stats;
mod store;

pub use on_demand::{OnDemandEntry, OnDemandStore, PendingOnDemand};
pub use reconcile::{decide, reconcile, Decision, EvictReason, EvictedEntry, KeptEntry, Reconciliation};
pub use result::CacheResult;
pub use stats::CacheStats;
pub use store::{Cache, EdgeSet, NamespaceData, ProviderCache};
