//! # cloudsync-core
//!
//! Core types, traits, and error handling shared by the cloudsync crates.
//!
//! This crate provides the foundational pieces used by the cache, the
//! loaders and the load balancer upsert engine:
//!
//! - [`SyncError`] - Error type with transient / contract-violation classification
//! - [`keys`] - Namespaces and the canonical `tag:field:...` key scheme
//! - [`Moniker`] - Server group name parsing (application, cluster, sequence)
//! - [`EntitySnapshot`] - Key, typed attributes and relationship edges
//! - [`ListenerProtocol`] - Listener protocols tagged by layer
//! - [`RemoteLister`] / [`RemoteMutator`] - The remote cloud API boundary
//! - [`StatusSink`] - Progress narration for multi-step operations
//!
//! ## Example
//!
//! ```rust
//! use cloudsync_core::{keys, Moniker};
//!
//! let moniker = Moniker::parse("web-prod-v007").unwrap();
//! let cluster = keys::cluster("prod", moniker.application(), moniker.cluster()).unwrap();
//! assert_eq!(cluster, "cluster:prod:web:web-prod");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod entity;
pub mod keys;
pub mod listener;
mod moniker;
mod protocol;
pub mod remote;
mod status;
mod time;

pub use entity::{Attributes, EntitySnapshot};
pub use error::SyncError;
pub use keys::{Namespace, ParsedKey};
pub use listener::{Certificate, HealthCheck, Listener, ListenerLayer, Rule, Target, TargetKind};
pub use moniker::Moniker;
pub use protocol::{L4Protocol, L7Protocol, ListenerProtocol};
pub use remote::{
    ListFilter, Mutation, RemoteLister, RemoteMutator, Scope, Submission, TaskHandle, TaskStatus,
};
pub use status::{NullSink, StatusLine, StatusSink, TaskLog};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};

/// Result type alias using [`SyncError`].
pub type SyncResult<T> = std::result::Result<T, SyncError>;
