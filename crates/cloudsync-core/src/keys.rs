//! Namespaces and the canonical cache key scheme.
//!
//! Every entity is addressed by a key of the form `tag:field:field...` where
//! `tag` identifies the [`Namespace`]. Keys are derived only from
//! (id | name, account, region) so independent loaders agree on identity
//! without talking to each other.
//!
//! ```rust
//! use cloudsync_core::keys::{self, Namespace};
//!
//! let key = keys::security_group("account1", "region1", "sg-123").unwrap();
//! assert_eq!(key, "sg:account1:region1:sg-123");
//!
//! let parsed = keys::parse(&key).unwrap();
//! assert_eq!(parsed.namespace(), Namespace::SecurityGroups);
//! assert_eq!(parsed.account(), Some("account1"));
//! assert_eq!(parsed.name(), "sg-123");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{SyncError, SyncResult};

const SEPARATOR: char = ':';

/// A named partition of the cache holding one resource family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    /// Applications, derived from server group and load balancer names.
    Applications,
    /// Clusters (server groups sharing a name prefix).
    Clusters,
    /// Auto scaling groups.
    ServerGroups,
    /// Compute instances.
    Instances,
    /// Load balancers.
    LoadBalancers,
    /// Security groups.
    SecurityGroups,
    /// Virtual networks.
    Networks,
    /// Subnets within a network.
    Subnets,
    /// Machine images.
    Images,
    /// Image names mapped to the images carrying them.
    NamedImages,
    /// SSH key pairs.
    KeyPairs,
    /// Instance types offered in a region.
    InstanceTypes,
    /// Point-in-time refreshes written outside the full-scan cadence.
    OnDemand,
}

impl Namespace {
    /// Every namespace, in a stable order.
    pub const ALL: [Namespace; 13] = [
        Namespace::Applications,
        Namespace::Clusters,
        Namespace::ServerGroups,
        Namespace::Instances,
        Namespace::LoadBalancers,
        Namespace::SecurityGroups,
        Namespace::Networks,
        Namespace::Subnets,
        Namespace::Images,
        Namespace::NamedImages,
        Namespace::KeyPairs,
        Namespace::InstanceTypes,
        Namespace::OnDemand,
    ];

    /// The namespace name as used in logs and serialized payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applications => "applications",
            Self::Clusters => "clusters",
            Self::ServerGroups => "serverGroups",
            Self::Instances => "instances",
            Self::LoadBalancers => "loadBalancers",
            Self::SecurityGroups => "securityGroups",
            Self::Networks => "networks",
            Self::Subnets => "subnets",
            Self::Images => "images",
            Self::NamedImages => "namedImages",
            Self::KeyPairs => "keyPairs",
            Self::InstanceTypes => "instanceTypes",
            Self::OnDemand => "onDemand",
        }
    }

    /// The short tag that prefixes keys in this namespace.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Applications => "app",
            Self::Clusters => "cluster",
            Self::ServerGroups => "svg",
            Self::Instances => "inst",
            Self::LoadBalancers => "lb",
            Self::SecurityGroups => "sg",
            Self::Networks => "vpc",
            Self::Subnets => "subnet",
            Self::Images => "img",
            Self::NamedImages => "nimg",
            Self::KeyPairs => "kp",
            Self::InstanceTypes => "itype",
            Self::OnDemand => "od",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.tag() == tag)
    }

    /// Number of fields following the tag in a key of this namespace.
    fn arity(&self) -> usize {
        match self {
            Self::Applications => 1,
            Self::NamedImages => 2,
            _ => 3,
        }
    }

    /// Whether keys in this namespace carry a region field.
    fn has_region(&self) -> bool {
        !matches!(
            self,
            Self::Applications | Self::Clusters | Self::NamedImages
        )
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ns| ns.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SyncError::InvalidRequest {
                field: "namespace".to_string(),
                reason: format!("unknown namespace {s:?}"),
            })
    }
}

/// A key split back into its namespace and fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedKey {
    namespace: Namespace,
    fields: Vec<String>,
}

impl ParsedKey {
    /// The namespace the key belongs to.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// The account field, absent for application keys.
    #[must_use]
    pub fn account(&self) -> Option<&str> {
        match self.namespace {
            Namespace::Applications => None,
            _ => self.fields.first().map(String::as_str),
        }
    }

    /// The region field, for namespaces that are regional.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        if self.namespace.has_region() {
            self.fields.get(1).map(String::as_str)
        } else {
            None
        }
    }

    /// The trailing id or name field.
    #[must_use]
    pub fn name(&self) -> &str {
        self.fields.last().map(String::as_str).unwrap_or_default()
    }

    /// All fields after the tag.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Parse a key produced by one of the derivation functions in this module.
pub fn parse(key: &str) -> SyncResult<ParsedKey> {
    let mut parts = key.split(SEPARATOR);
    let tag = parts.next().unwrap_or_default();
    let namespace = Namespace::from_tag(tag).ok_or_else(|| SyncError::InvalidKey {
        key: key.to_string(),
        reason: format!("unknown tag {tag:?}"),
    })?;

    let fields: Vec<String> = parts.map(str::to_string).collect();
    if fields.len() != namespace.arity() {
        return Err(SyncError::InvalidKey {
            key: key.to_string(),
            reason: format!(
                "{namespace} keys have {} fields, found {}",
                namespace.arity(),
                fields.len()
            ),
        });
    }
    if fields.iter().any(String::is_empty) {
        return Err(SyncError::InvalidKey {
            key: key.to_string(),
            reason: "empty field".to_string(),
        });
    }

    Ok(ParsedKey { namespace, fields })
}

fn build(namespace: Namespace, fields: &[(&str, &str)]) -> SyncResult<String> {
    let mut key = String::from(namespace.tag());
    for (label, value) in fields {
        if value.is_empty() {
            return Err(SyncError::MissingIdentity {
                namespace: namespace.to_string(),
                reason: format!("{label} is empty"),
            });
        }
        if value.contains(SEPARATOR) {
            return Err(SyncError::InvalidKey {
                key: (*value).to_string(),
                reason: format!("{label} contains '{SEPARATOR}'"),
            });
        }
        key.push(SEPARATOR);
        key.push_str(value);
    }
    Ok(key)
}

/// Key for an application.
pub fn application(application: &str) -> SyncResult<String> {
    build(Namespace::Applications, &[("application", application)])
}

/// Key for a cluster.
pub fn cluster(account: &str, application: &str, cluster: &str) -> SyncResult<String> {
    build(
        Namespace::Clusters,
        &[
            ("account", account),
            ("application", application),
            ("cluster", cluster),
        ],
    )
}

/// Key for a server group, by name.
pub fn server_group(account: &str, region: &str, name: &str) -> SyncResult<String> {
    regional(Namespace::ServerGroups, account, region, name)
}

/// Key for an instance, by id.
pub fn instance(account: &str, region: &str, id: &str) -> SyncResult<String> {
    regional(Namespace::Instances, account, region, id)
}

/// Key for a load balancer, by id.
pub fn load_balancer(account: &str, region: &str, id: &str) -> SyncResult<String> {
    regional(Namespace::LoadBalancers, account, region, id)
}

/// Key for a security group, by id.
pub fn security_group(account: &str, region: &str, id: &str) -> SyncResult<String> {
    regional(Namespace::SecurityGroups, account, region, id)
}

/// Key for a network, by id.
pub fn network(account: &str, region: &str, id: &str) -> SyncResult<String> {
    regional(Namespace::Networks, account, region, id)
}

/// Key for a subnet, by id.
pub fn subnet(account: &str, region: &str, id: &str) -> SyncResult<String> {
    regional(Namespace::Subnets, account, region, id)
}

/// Key for an image, by id.
pub fn image(account: &str, region: &str, id: &str) -> SyncResult<String> {
    regional(Namespace::Images, account, region, id)
}

/// Key for an image name. Not regional: the same name may exist everywhere.
pub fn named_image(account: &str, name: &str) -> SyncResult<String> {
    build(
        Namespace::NamedImages,
        &[("account", account), ("name", name)],
    )
}

/// Key for a key pair, by id.
pub fn key_pair(account: &str, region: &str, id: &str) -> SyncResult<String> {
    regional(Namespace::KeyPairs, account, region, id)
}

/// Key for an instance type, by name.
pub fn instance_type(account: &str, region: &str, name: &str) -> SyncResult<String> {
    regional(Namespace::InstanceTypes, account, region, name)
}

fn regional(namespace: Namespace, account: &str, region: &str, id: &str) -> SyncResult<String> {
    build(
        namespace,
        &[("account", account), ("region", region), ("id", id)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regional_key_format() {
        assert_eq!(
            server_group("prod", "ap-guangzhou", "web-main-v001").unwrap(),
            "svg:prod:ap-guangzhou:web-main-v001"
        );
        assert_eq!(
            instance("prod", "ap-guangzhou", "ins-1").unwrap(),
            "inst:prod:ap-guangzhou:ins-1"
        );
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let a = load_balancer("prod", "r1", "lb-1").unwrap();
        let b = load_balancer("prod", "r1", "lb-1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_field_rejected() {
        let err = instance("prod", "r1", "").unwrap_err();
        assert!(matches!(err, SyncError::MissingIdentity { .. }));
    }

    #[test]
    fn test_separator_in_field_rejected() {
        let err = application("web:api").unwrap_err();
        assert!(matches!(err, SyncError::InvalidKey { .. }));
    }

    #[test]
    fn test_parse_round_trips_fields() {
        let key = cluster("prod", "web", "web-main").unwrap();
        let parsed = parse(&key).unwrap();
        assert_eq!(parsed.namespace(), Namespace::Clusters);
        assert_eq!(parsed.account(), Some("prod"));
        assert_eq!(parsed.region(), None);
        assert_eq!(parsed.name(), "web-main");

        let parsed = parse("app:web").unwrap();
        assert_eq!(parsed.account(), None);
        assert_eq!(parsed.name(), "web");
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!(parse("nope:a:b:c").is_err());
        assert!(parse("svg:prod:r1").is_err());
        assert!(parse("svg:prod::x").is_err());
    }

    #[test]
    fn test_namespace_from_str() {
        assert_eq!(
            "serverGroups".parse::<Namespace>().unwrap(),
            Namespace::ServerGroups
        );
        assert_eq!(
            "LOADBALANCERS".parse::<Namespace>().unwrap(),
            Namespace::LoadBalancers
        );
        assert!("widgets".parse::<Namespace>().is_err());
    }

    #[test]
    fn test_namespace_tags_are_unique() {
        for (i, a) in Namespace::ALL.iter().enumerate() {
            for b in &Namespace::ALL[i + 1..] {
                assert_ne!(a.tag(), b.tag());
            }
        }
    }
}
