//! # cloudsync-agent
//!
//! Loaders, on-demand refresh and the per-scope pipelines that keep a
//! [`ProviderCache`](cloudsync_cache::ProviderCache) in step with a remote
//! cloud account.
//!
//! - [`CachingAgent`] - Full-scan loader contract, one per resource family
//! - [`OnDemandAgent`] - Point refresh of one resource after a mutation
//! - [`Pipeline`] - Scan, reconcile and install for one (account, region)
//! - [`Scheduler`] - Runs pipelines periodically with graceful shutdown
//! - [`SyncConfig`] - Accounts, regions and intervals
//! - [`AgentMetrics`] - Cycle and on-demand metrics via the `metrics` facade
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cloudsync_agent::{Pipeline, Scheduler, SyncConfig};
//! use cloudsync_cache::ProviderCache;
//!
//! let config = SyncConfig::new().account("prod", ["region1"]);
//! let pipelines = config
//!     .scopes()
//!     .into_iter()
//!     .map(|scope| Arc::new(Pipeline::new(scope, Arc::new(ProviderCache::new()), lister.clone())))
//!     .collect();
//! let scheduler = Scheduler::from_config(&config, pipelines)?;
//! // ...
//! scheduler.shutdown().await;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod config;
pub mod loaders;
mod metrics;
mod on_demand;
mod pipeline;
mod scheduler;

pub use agent::{AgentDataType, Authority, CachingAgent};
pub use config::{AccountConfig, SyncConfig, TaskPollConfig};
pub use metrics::AgentMetrics;
pub use on_demand::{OnDemandAgent, OnDemandKind, OnDemandRequest, OnDemandResult};
pub use pipeline::{AgentOutcome, AgentReport, CycleReport, Pipeline};
pub use scheduler::Scheduler;
