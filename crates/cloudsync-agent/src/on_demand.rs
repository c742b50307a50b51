//! On-demand refresh of a single resource.
//!
//! A write path calls [`OnDemandAgent::handle_on_demand`] right after it has
//! mutated a resource. The agent reads that one resource the same way its
//! full scan would, and stores the result in the `on-demand` namespace. It
//! never touches the main cache: the entry becomes visible when the next
//! reconcile pass merges it into a fresh scan.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use cloudsync_cache::{CacheResult, OnDemandEntry, PendingOnDemand, ProviderCache};
use cloudsync_core::{Clock, Namespace, RemoteLister, Scope, SyncError, SyncResult, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::CachingAgent;

/// The resource families that support point refreshes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnDemandKind {
    /// Server groups, addressed by name.
    ServerGroup,
    /// Load balancers, addressed by id.
    LoadBalancer,
    /// Security groups, addressed by id.
    SecurityGroup,
}

impl OnDemandKind {
    /// The authoritative namespace refreshed by this kind.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::ServerGroup => Namespace::ServerGroups,
            Self::LoadBalancer => Namespace::LoadBalancers,
            Self::SecurityGroup => Namespace::SecurityGroups,
        }
    }

    /// The kind refreshing `namespace`, if any.
    #[must_use]
    pub fn from_namespace(namespace: Namespace) -> Option<Self> {
        match namespace {
            Namespace::ServerGroups => Some(Self::ServerGroup),
            Namespace::LoadBalancers => Some(Self::LoadBalancer),
            Namespace::SecurityGroups => Some(Self::SecurityGroup),
            _ => None,
        }
    }

    /// Name used in requests and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerGroup => "serverGroup",
            Self::LoadBalancer => "loadBalancer",
            Self::SecurityGroup => "securityGroup",
        }
    }
}

impl fmt::Display for OnDemandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnDemandKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::ServerGroup, Self::LoadBalancer, Self::SecurityGroup]
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SyncError::UnknownOperation(format!("on-demand refresh of {s:?}")))
    }
}

/// A request to refresh one resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandRequest {
    /// Resource family.
    pub kind: OnDemandKind,
    /// Account the resource lives in.
    pub account: String,
    /// Region the resource lives in.
    pub region: String,
    /// Server group name, or load balancer / security group id.
    pub resource: String,
}

impl OnDemandRequest {
    /// Create a request.
    pub fn new(
        kind: OnDemandKind,
        account: impl Into<String>,
        region: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            account: account.into(),
            region: region.into(),
            resource: resource.into(),
        }
    }

    /// The scope the request targets.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(self.account.clone(), self.region.clone())
    }

    /// Check that the request names a resource at all.
    pub fn validate(&self) -> SyncResult<()> {
        for (field, value) in [
            ("account", &self.account),
            ("region", &self.region),
            ("resource", &self.resource),
        ] {
            if value.is_empty() {
                return Err(SyncError::InvalidRequest {
                    field: field.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// What a handled on-demand request stored.
#[derive(Clone, Debug)]
pub struct OnDemandResult {
    /// Key of the refreshed resource.
    pub key: String,
    /// Its authoritative namespace.
    pub namespace: Namespace,
    /// When the remote read completed.
    pub captured_at: Timestamp,
    /// Store generation of the written entry.
    pub generation: u64,
    /// The loaded data, as stored in the entry payload.
    pub result: CacheResult,
}

/// A loader that can also refresh a single resource of its family.
#[async_trait]
pub trait OnDemandAgent: CachingAgent {
    /// The family this agent refreshes.
    fn on_demand_kind(&self) -> OnDemandKind;

    /// Load one resource. Returns its key and a result in which the
    /// authoritative namespace is declared even when the resource is gone.
    async fn load_one(
        &self,
        lister: &dyn RemoteLister,
        resource: &str,
    ) -> SyncResult<(String, CacheResult)>;

    /// Whether this agent serves `kind` in `scope`.
    fn handles(&self, kind: OnDemandKind, scope: &Scope) -> bool {
        kind == self.on_demand_kind() && scope == self.scope()
    }

    /// Refresh one resource and store it as an on-demand entry.
    ///
    /// Returns `Ok(None)` when the request is for another kind or scope.
    async fn handle_on_demand(
        &self,
        request: &OnDemandRequest,
        lister: &dyn RemoteLister,
        cache: &ProviderCache,
        clock: &dyn Clock,
    ) -> SyncResult<Option<OnDemandResult>> {
        if !self.handles(request.kind, &request.scope()) {
            return Ok(None);
        }
        request.validate()?;

        let (key, result) = self.load_one(lister, &request.resource).await?;
        let captured_at = clock.now();
        let namespace = request.kind.namespace();
        let entry = OnDemandEntry::new(key.clone(), namespace, captured_at, &result)?;
        let generation = cache.on_demand().put(entry);
        cache.stats().record_on_demand_stored();

        if result.contains(namespace, &key) {
            debug!(agent = %self.agent_name(), key = %key, generation, "stored on-demand refresh");
        } else {
            info!(agent = %self.agent_name(), key = %key, generation, "resource gone, stored removal");
        }

        Ok(Some(OnDemandResult {
            key,
            namespace,
            captured_at,
            generation,
            result,
        }))
    }

    /// Outstanding on-demand entries in this agent's namespace and scope.
    fn pending_on_demand_requests(&self, cache: &ProviderCache, now: Timestamp) -> Vec<PendingOnDemand> {
        let namespace = self.on_demand_kind().namespace();
        let scope = self.scope();
        cache
            .on_demand()
            .pending(now)
            .into_iter()
            .filter(|p| p.namespace == namespace)
            .filter(|p| {
                cloudsync_core::keys::parse(&p.key).is_ok_and(|parsed| {
                    parsed.account() == Some(scope.account.as_str())
                        && parsed.region() == Some(scope.region.as_str())
                })
            })
            .collect()
    }
}
