//! # cloudsync-lb
//!
//! Declarative load balancer changes: diff a desired listener tree against
//! the remote one and apply the difference as asynchronous remote tasks.
//!
//! - [`diff`] - Identity-preserving diffs for listeners, rules and targets
//! - [`TaskPoller`] - Bounded polling of remote task handles
//! - [`LoadBalancerUpserter`] - Validate, create, diff, apply, refresh
//! - [`OnDemandTrigger`] - Hook that refreshes the cache after an upsert
//!
//! ## Example
//!
//! ```rust,ignore
//! use cloudsync_core::{L4Protocol, Listener, TaskLog, Target};
//! use cloudsync_lb::{LoadBalancerUpserter, UpsertLoadBalancerRequest};
//!
//! let request = UpsertLoadBalancerRequest::new("prod", "ap-guangzhou", "web")
//!     .listener(Listener::layer4(L4Protocol::Tcp, 80).with_target(Target::new("ins-1", 80)));
//!
//! let upserter = LoadBalancerUpserter::new(lister, mutator).with_trigger(pipeline);
//! let outcome = upserter.upsert(&request, &TaskLog::new()).await?;
//! assert!(outcome.is_success());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod diff;
mod poller;
mod upsert;

pub use diff::{Diff, Plan, Reconcilable};
pub use poller::{TaskOutcome, TaskPoller};
pub use upsert::{
    LoadBalancerUpserter, OnDemandTrigger, StepOutcome, StepReport, UpsertLoadBalancerRequest,
    UpsertOutcome, PHASE,
};
