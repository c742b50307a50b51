//! The remote cloud API, seen from the synchronization core.
//!
//! [`RemoteLister`] reads resources for one account and region and
//! [`RemoteMutator`] submits asynchronous mutations. Pagination, retries
//! and SDK error translation are the implementor's concern; the core only
//! sees typed records and [`SyncError`](crate::SyncError) values.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::listener::{Certificate, HealthCheck, Target};
use crate::time::Timestamp;
use crate::SyncResult;

/// One account in one region: the unit a pipeline synchronizes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Account name.
    pub account: String,
    /// Region name.
    pub region: String,
}

impl Scope {
    /// Create a scope.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

/// Narrows a list call to particular resources.
///
/// An empty filter matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Resource ids to match.
    pub ids: Vec<String>,
    /// Resource names to match.
    pub names: Vec<String>,
}

impl ListFilter {
    /// Match every resource.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one resource id.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            names: Vec::new(),
        }
    }

    /// Match one resource name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            ids: Vec::new(),
            names: vec![name.into()],
        }
    }

    /// Whether the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.names.is_empty()
    }

    /// Whether a resource with this id and name passes the filter.
    #[must_use]
    pub fn matches(&self, id: &str, name: &str) -> bool {
        self.is_empty()
            || self.ids.iter().any(|i| i == id)
            || self.names.iter().any(|n| n == name)
    }
}

/// Launch settings shared by a server group's instances.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfiguration {
    /// Launch configuration id.
    pub id: String,
    /// Image instances boot from.
    pub image_id: String,
    /// Instance type.
    pub instance_type: String,
    /// Security groups attached to new instances.
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// Key pairs installed on new instances.
    #[serde(default)]
    pub key_pair_ids: Vec<String>,
}

/// Server group as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteServerGroup {
    /// Remote id.
    pub id: String,
    /// Name, following the `app-stack-detail-vNNN` convention.
    pub name: String,
    /// Lifecycle status (`NORMAL`, `CREATING`, ...).
    pub status: String,
    /// Whether scaling activities are suspended.
    #[serde(default)]
    pub disabled: bool,
    /// Minimum size.
    pub min_size: u32,
    /// Maximum size.
    pub max_size: u32,
    /// Desired size.
    pub desired_size: u32,
    /// Launch settings.
    #[serde(default)]
    pub launch_configuration: Option<LaunchConfiguration>,
    /// Network the group launches into.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Subnets the group launches into.
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// Availability zones.
    #[serde(default)]
    pub zones: Vec<String>,
    /// Load balancers new instances are registered with.
    #[serde(default)]
    pub load_balancer_ids: Vec<String>,
    /// Current member instances.
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Instance as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInstance {
    /// Remote id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle state (`RUNNING`, `STOPPED`, ...).
    pub state: String,
    /// Availability zone.
    pub zone: String,
    /// Boot image.
    #[serde(default)]
    pub image_id: Option<String>,
    /// Instance type.
    #[serde(default)]
    pub instance_type: Option<String>,
    /// Private addresses.
    #[serde(default)]
    pub private_ips: Vec<String>,
    /// Public addresses.
    #[serde(default)]
    pub public_ips: Vec<String>,
    /// Network.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Subnet.
    #[serde(default)]
    pub subnet_id: Option<String>,
    /// Attached security groups.
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// Name of the owning server group, from the instance's tags.
    #[serde(default)]
    pub server_group_name: Option<String>,
    /// Launch time.
    #[serde(default)]
    pub launched_at: Option<Timestamp>,
}

/// Forwarding rule as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRule {
    /// Remote id.
    pub location_id: String,
    /// Host matched.
    pub domain: String,
    /// Path matched.
    pub url: String,
    /// Health check.
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    /// Registered targets.
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// Listener as reported by the remote side. The protocol is still a string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteListener {
    /// Remote id.
    pub listener_id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Raw protocol string.
    pub protocol: String,
    /// Frontend port.
    pub port: u16,
    /// Listener-level health check (layer-4).
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    /// Certificate.
    #[serde(default)]
    pub certificate: Option<Certificate>,
    /// Targets registered on the listener (layer-4).
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Forwarding rules (layer-7).
    #[serde(default)]
    pub rules: Vec<RemoteRule>,
}

/// Load balancer as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLoadBalancer {
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// `OPEN` (internet facing) or `INTERNAL`.
    pub kind: String,
    /// Network.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Subnet, for internal load balancers.
    #[serde(default)]
    pub subnet_id: Option<String>,
    /// Virtual IPs.
    #[serde(default)]
    pub vips: Vec<String>,
    /// Attached security groups.
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// Listeners with their rules and targets.
    #[serde(default)]
    pub listeners: Vec<RemoteListener>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// One security group rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    /// Protocol (`TCP`, `UDP`, `ICMP`, `ALL`).
    pub protocol: String,
    /// Port or port range, `ALL` when unrestricted.
    pub port: String,
    /// Peer CIDR block.
    #[serde(default)]
    pub cidr_block: Option<String>,
    /// Peer security group.
    #[serde(default)]
    pub source_security_group_id: Option<String>,
    /// `ACCEPT` or `DROP`.
    pub action: String,
}

/// Security group as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSecurityGroup {
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Inbound rules.
    #[serde(default)]
    pub ingress: Vec<SecurityRule>,
    /// Outbound rules.
    #[serde(default)]
    pub egress: Vec<SecurityRule>,
}

/// Network as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNetwork {
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Address range.
    pub cidr_block: String,
    /// Whether this is the account's default network.
    #[serde(default)]
    pub is_default: bool,
}

/// Subnet as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSubnet {
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Owning network.
    pub network_id: String,
    /// Address range.
    pub cidr_block: String,
    /// Availability zone.
    pub zone: String,
}

/// Image as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteImage {
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Operating system description.
    #[serde(default)]
    pub os_name: String,
    /// `PUBLIC_IMAGE`, `PRIVATE_IMAGE`, ...
    pub image_type: String,
    /// `NORMAL`, `CREATING`, ...
    pub state: String,
    /// Backing disk snapshots.
    #[serde(default)]
    pub snapshot_ids: Vec<String>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Key pair as reported by the remote side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteKeyPair {
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Public key fingerprint.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Instance type offered in a zone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInstanceType {
    /// Type name, e.g. `S5.MEDIUM4`.
    pub name: String,
    /// Zone offering it.
    pub zone: String,
    /// Type family.
    pub family: String,
    /// Virtual CPUs.
    pub cpu: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
}

/// Read access to one cloud provider.
///
/// Every method lists resources for a single [`Scope`]. Implementations page
/// through results themselves and report failures as
/// [`SyncError::Remote`](crate::SyncError::Remote), marking throttling and
/// timeouts as transient.
#[async_trait]
pub trait RemoteLister: Send + Sync {
    /// List server groups.
    async fn list_server_groups(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteServerGroup>>;

    /// List instances.
    async fn list_instances(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteInstance>>;

    /// List load balancers with their listeners, rules and targets.
    async fn list_load_balancers(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteLoadBalancer>>;

    /// List security groups.
    async fn list_security_groups(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteSecurityGroup>>;

    /// List networks.
    async fn list_networks(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteNetwork>>;

    /// List subnets.
    async fn list_subnets(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteSubnet>>;

    /// List images.
    async fn list_images(&self, scope: &Scope, filter: &ListFilter)
        -> SyncResult<Vec<RemoteImage>>;

    /// List key pairs.
    async fn list_key_pairs(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteKeyPair>>;

    /// List instance types.
    async fn list_instance_types(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteInstanceType>>;
}

/// A mutation submitted to the remote side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mutation {
    /// Create a load balancer.
    #[serde(rename_all = "camelCase")]
    CreateLoadBalancer {
        /// Name.
        name: String,
        /// `OPEN` or `INTERNAL`.
        kind: String,
        /// Network.
        network_id: Option<String>,
        /// Subnet.
        subnet_id: Option<String>,
        /// Security groups.
        security_group_ids: Vec<String>,
    },
    /// Create a listener, without rules or targets.
    #[serde(rename_all = "camelCase")]
    CreateListener {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Display name.
        name: Option<String>,
        /// Raw protocol string.
        protocol: String,
        /// Frontend port.
        port: u16,
        /// Listener-level health check (layer-4).
        health_check: Option<HealthCheck>,
        /// Certificate.
        certificate: Option<Certificate>,
    },
    /// Change a listener's health check.
    #[serde(rename_all = "camelCase")]
    ModifyListener {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Listener.
        listener_id: String,
        /// New health check.
        health_check: HealthCheck,
    },
    /// Delete a listener together with its rules and targets.
    #[serde(rename_all = "camelCase")]
    DeleteListener {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Listener.
        listener_id: String,
    },
    /// Create a forwarding rule.
    #[serde(rename_all = "camelCase")]
    CreateRule {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Parent listener.
        listener_id: String,
        /// Host matched.
        domain: String,
        /// Path matched.
        url: String,
        /// Health check.
        health_check: Option<HealthCheck>,
    },
    /// Change a rule's health check.
    #[serde(rename_all = "camelCase")]
    ModifyRule {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Parent listener.
        listener_id: String,
        /// Rule.
        location_id: String,
        /// New health check.
        health_check: HealthCheck,
    },
    /// Delete a rule together with its targets.
    #[serde(rename_all = "camelCase")]
    DeleteRule {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Parent listener.
        listener_id: String,
        /// Rule.
        location_id: String,
    },
    /// Register targets on a listener (layer-4) or rule (layer-7).
    #[serde(rename_all = "camelCase")]
    RegisterTargets {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Parent listener.
        listener_id: String,
        /// Parent rule, for layer-7.
        location_id: Option<String>,
        /// Targets to add.
        targets: Vec<Target>,
    },
    /// Deregister targets from a listener (layer-4) or rule (layer-7).
    #[serde(rename_all = "camelCase")]
    DeregisterTargets {
        /// Parent load balancer.
        load_balancer_id: String,
        /// Parent listener.
        listener_id: String,
        /// Parent rule, for layer-7.
        location_id: Option<String>,
        /// Targets to remove.
        targets: Vec<Target>,
    },
}

impl Mutation {
    /// Short operation name for logs and progress lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateLoadBalancer { .. } => "createLoadBalancer",
            Self::CreateListener { .. } => "createListener",
            Self::ModifyListener { .. } => "modifyListener",
            Self::DeleteListener { .. } => "deleteListener",
            Self::CreateRule { .. } => "createRule",
            Self::ModifyRule { .. } => "modifyRule",
            Self::DeleteRule { .. } => "deleteRule",
            Self::RegisterTargets { .. } => "registerTargets",
            Self::DeregisterTargets { .. } => "deregisterTargets",
        }
    }
}

/// Handle to an asynchronous remote task.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    /// Wrap a remote request id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The remote request id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of submitting a mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// Task to poll.
    pub task: TaskHandle,
    /// Ids of resources the mutation creates (listener ids, location ids,
    /// load balancer ids), in request order.
    pub resource_ids: Vec<String>,
}

/// State of an asynchronous remote task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still running.
    Pending,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed(String),
}

/// Write access to one cloud provider.
#[async_trait]
pub trait RemoteMutator: Send + Sync {
    /// Submit a mutation; the returned task must be polled for completion.
    async fn submit(&self, scope: &Scope, mutation: Mutation) -> SyncResult<Submission>;

    /// Query the status of a previously submitted task.
    async fn poll_status(&self, scope: &Scope, task: &TaskHandle) -> SyncResult<TaskStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(ListFilter::all().matches("any", "thing"));
    }

    #[test]
    fn test_filter_by_id_or_name() {
        let by_id = ListFilter::by_id("lb-1");
        assert!(by_id.matches("lb-1", "web"));
        assert!(!by_id.matches("lb-2", "web"));

        let by_name = ListFilter::by_name("web-v001");
        assert!(by_name.matches("asg-1", "web-v001"));
        assert!(!by_name.matches("asg-1", "web-v002"));
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::new("prod", "ap-shanghai").to_string(), "prod/ap-shanghai");
    }

    #[test]
    fn test_mutation_names() {
        let m = Mutation::DeleteListener {
            load_balancer_id: "lb-1".into(),
            listener_id: "lbl-1".into(),
        };
        assert_eq!(m.name(), "deleteListener");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "deleteListener");
        assert_eq!(json["loadBalancerId"], "lb-1");
    }
}
