//! The caching agent contract.

use std::fmt;

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::{Namespace, RemoteLister, Scope, SyncResult};

/// Whether an agent owns a namespace or only contributes edges to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Authority {
    /// The agent's output replaces the namespace wholesale every cycle.
    Authoritative,
    /// The agent adds relationship edges to entities another agent owns.
    Informative,
}

/// A namespace an agent produces, and how.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AgentDataType {
    /// The namespace.
    pub namespace: Namespace,
    /// Ownership.
    pub authority: Authority,
}

impl AgentDataType {
    /// An owned namespace.
    #[must_use]
    pub const fn authoritative(namespace: Namespace) -> Self {
        Self {
            namespace,
            authority: Authority::Authoritative,
        }
    }

    /// A namespace the agent only contributes edges to.
    #[must_use]
    pub const fn informative(namespace: Namespace) -> Self {
        Self {
            namespace,
            authority: Authority::Informative,
        }
    }

    /// Whether the namespace is owned.
    #[must_use]
    pub fn is_authoritative(&self) -> bool {
        self.authority == Authority::Authoritative
    }
}

/// A full-scan loader for one resource family in one scope.
///
/// `load_data` must either return every authoritative namespace completely
/// repopulated or fail as a whole. It never writes to the cache.
#[async_trait]
pub trait CachingAgent: Send + Sync + fmt::Debug {
    /// Stable agent name, e.g. `ServerGroupLoader`.
    fn agent_type(&self) -> &'static str;

    /// The account and region this agent loads.
    fn scope(&self) -> &Scope;

    /// The namespaces this agent produces.
    fn provided_data_types(&self) -> &'static [AgentDataType];

    /// List every resource of the family and map it into a cache result.
    async fn load_data(&self, lister: &dyn RemoteLister) -> SyncResult<CacheResult>;

    /// Namespaces this agent owns.
    fn authoritative_namespaces(&self) -> Vec<Namespace> {
        self.provided_data_types()
            .iter()
            .filter(|t| t.is_authoritative())
            .map(|t| t.namespace)
            .collect()
    }

    /// `agent_type` qualified by scope, for logs.
    fn agent_name(&self) -> String {
        format!("{}/{}", self.scope(), self.agent_type())
    }
}
