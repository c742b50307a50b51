//! Entity snapshots: one resource's point-in-time representation.
//!
//! An [`EntitySnapshot`] is addressed by its key, carries typed
//! [`Attributes`] and a set of relationship edges to other namespaces.
//! Edges are plain key sets, never object references; following an edge is
//! always a lookup through the cache.
//!
//! Ordered collections are used throughout so that two scans of an
//! unchanged remote state serialize to identical bytes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::keys::Namespace;
use crate::listener::Listener;
use crate::remote::{LaunchConfiguration, SecurityRule};
use crate::time::Timestamp;

/// Attributes of an application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationAttributes {
    /// Application name.
    pub name: String,
}

/// Attributes of a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAttributes {
    /// Account.
    pub account: String,
    /// Application.
    pub application: String,
    /// Cluster name.
    pub name: String,
}

/// Server group capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    /// Minimum size.
    pub min: u32,
    /// Maximum size.
    pub max: u32,
    /// Desired size.
    pub desired: u32,
}

/// Attributes of a server group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerGroupAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Application, from the name.
    pub application: String,
    /// Cluster, from the name.
    pub cluster: String,
    /// Remote lifecycle status.
    pub status: String,
    /// Whether scaling is suspended.
    pub disabled: bool,
    /// Capacity.
    pub capacity: Capacity,
    /// Launch settings.
    pub launch_configuration: Option<LaunchConfiguration>,
    /// Network.
    pub network_id: Option<String>,
    /// Subnets.
    pub subnet_ids: Vec<String>,
    /// Zones.
    pub zones: Vec<String>,
    /// Creation time.
    pub created_at: Option<Timestamp>,
    /// Tags.
    pub tags: BTreeMap<String, String>,
}

/// Attributes of an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle state.
    pub state: String,
    /// Zone.
    pub zone: String,
    /// Boot image.
    pub image_id: Option<String>,
    /// Instance type.
    pub instance_type: Option<String>,
    /// Private addresses.
    pub private_ips: Vec<String>,
    /// Public addresses.
    pub public_ips: Vec<String>,
    /// Network.
    pub network_id: Option<String>,
    /// Subnet.
    pub subnet_id: Option<String>,
    /// Owning server group.
    pub server_group: Option<String>,
    /// Launch time.
    pub launched_at: Option<Timestamp>,
}

/// Attributes of a load balancer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Application, from the name prefix.
    pub application: Option<String>,
    /// `OPEN` or `INTERNAL`.
    pub kind: String,
    /// Network.
    pub network_id: Option<String>,
    /// Subnet.
    pub subnet_id: Option<String>,
    /// Virtual IPs.
    pub vips: Vec<String>,
    /// Security groups.
    pub security_group_ids: Vec<String>,
    /// Listeners, rules and targets.
    pub listeners: Vec<Listener>,
    /// Creation time.
    pub created_at: Option<Timestamp>,
}

/// Attributes of a security group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Application, from the name prefix.
    pub application: Option<String>,
    /// Description.
    pub description: String,
    /// Inbound rules.
    pub ingress: Vec<SecurityRule>,
    /// Outbound rules.
    pub egress: Vec<SecurityRule>,
}

/// Attributes of a network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Address range.
    pub cidr_block: String,
    /// Whether this is the default network.
    pub is_default: bool,
}

/// Attributes of a subnet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Owning network.
    pub network_id: String,
    /// Address range.
    pub cidr_block: String,
    /// Zone.
    pub zone: String,
}

/// Attributes of an image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Operating system.
    pub os_name: String,
    /// Visibility type.
    pub image_type: String,
    /// Lifecycle state.
    pub state: String,
    /// Backing snapshots.
    pub snapshot_ids: Vec<String>,
    /// Creation time.
    pub created_at: Option<Timestamp>,
}

/// Attributes of an image name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedImageAttributes {
    /// Account.
    pub account: String,
    /// Image name.
    pub name: String,
}

/// Attributes of a key pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Remote id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Public key fingerprint.
    pub fingerprint: Option<String>,
}

/// Attributes of an instance type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypeAttributes {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Type name.
    pub name: String,
    /// Zones offering the type.
    pub zones: BTreeSet<String>,
    /// Type family.
    pub family: String,
    /// Virtual CPUs.
    pub cpu: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
}

/// Typed attributes, one variant per namespace schema.
///
/// [`Attributes::Opaque`] holds pass-through metadata the core never
/// interprets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Attributes {
    /// See [`ApplicationAttributes`].
    Application(ApplicationAttributes),
    /// See [`ClusterAttributes`].
    Cluster(ClusterAttributes),
    /// See [`ServerGroupAttributes`].
    ServerGroup(ServerGroupAttributes),
    /// See [`InstanceAttributes`].
    Instance(InstanceAttributes),
    /// See [`LoadBalancerAttributes`].
    LoadBalancer(LoadBalancerAttributes),
    /// See [`SecurityGroupAttributes`].
    SecurityGroup(SecurityGroupAttributes),
    /// See [`NetworkAttributes`].
    Network(NetworkAttributes),
    /// See [`SubnetAttributes`].
    Subnet(SubnetAttributes),
    /// See [`ImageAttributes`].
    Image(ImageAttributes),
    /// See [`NamedImageAttributes`].
    NamedImage(NamedImageAttributes),
    /// See [`KeyPairAttributes`].
    KeyPair(KeyPairAttributes),
    /// See [`InstanceTypeAttributes`].
    InstanceType(InstanceTypeAttributes),
    /// Vendor metadata the core does not interpret.
    Opaque(BTreeMap<String, serde_json::Value>),
}

impl Attributes {
    /// An empty opaque attribute bag.
    #[must_use]
    pub fn empty() -> Self {
        Self::Opaque(BTreeMap::new())
    }

    /// The namespace whose schema these attributes follow, if typed.
    #[must_use]
    pub fn namespace(&self) -> Option<Namespace> {
        Some(match self {
            Self::Application(_) => Namespace::Applications,
            Self::Cluster(_) => Namespace::Clusters,
            Self::ServerGroup(_) => Namespace::ServerGroups,
            Self::Instance(_) => Namespace::Instances,
            Self::LoadBalancer(_) => Namespace::LoadBalancers,
            Self::SecurityGroup(_) => Namespace::SecurityGroups,
            Self::Network(_) => Namespace::Networks,
            Self::Subnet(_) => Namespace::Subnets,
            Self::Image(_) => Namespace::Images,
            Self::NamedImage(_) => Namespace::NamedImages,
            Self::KeyPair(_) => Namespace::KeyPairs,
            Self::InstanceType(_) => Namespace::InstanceTypes,
            Self::Opaque(_) => return None,
        })
    }
}

/// One resource's representation in a single synchronization cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    key: String,
    attributes: Attributes,
    #[serde(default)]
    relationships: BTreeMap<Namespace, BTreeSet<String>>,
}

impl EntitySnapshot {
    /// Create a snapshot with no relationships.
    pub fn new(key: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            key: key.into(),
            attributes,
            relationships: BTreeMap::new(),
        }
    }

    /// A snapshot that only carries relationships.
    ///
    /// Used for informative edges a loader contributes to a namespace it
    /// does not own.
    pub fn placeholder(key: impl Into<String>) -> Self {
        Self::new(key, Attributes::empty())
    }

    /// Add an edge and return the snapshot.
    #[must_use]
    pub fn with_relationship(mut self, namespace: Namespace, key: impl Into<String>) -> Self {
        self.add_relationship(namespace, key);
        self
    }

    /// Add an edge.
    pub fn add_relationship(&mut self, namespace: Namespace, key: impl Into<String>) {
        self.relationships
            .entry(namespace)
            .or_default()
            .insert(key.into());
    }

    /// Add several edges to the same namespace.
    pub fn add_relationships<I, S>(&mut self, namespace: Namespace, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.relationships.entry(namespace).or_default();
        set.extend(keys.into_iter().map(Into::into));
    }

    /// The key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// All edges, by target namespace.
    #[must_use]
    pub fn relationships(&self) -> &BTreeMap<Namespace, BTreeSet<String>> {
        &self.relationships
    }

    /// Keys related to this entity in `namespace`.
    pub fn related(&self, namespace: Namespace) -> impl Iterator<Item = &str> {
        self.relationships
            .get(&namespace)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Fold a more current snapshot of the same entity into this one.
    ///
    /// Relationship sets are unioned. Attributes are replaced, unless the
    /// incoming snapshot is a relationship-only placeholder.
    pub fn merge_from(&mut self, other: EntitySnapshot) {
        let placeholder = matches!(&other.attributes, Attributes::Opaque(m) if m.is_empty());
        if !placeholder {
            self.attributes = other.attributes;
        }
        for (namespace, keys) in other.relationships {
            self.relationships.entry(namespace).or_default().extend(keys);
        }
    }
}
