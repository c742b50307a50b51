//! Load balancer listener configuration.
//!
//! The same model describes what the remote side reports (cached as
//! load balancer attributes) and what a caller asks for in an upsert.
//! Parentage is never stored on a child: a [`Rule`] does not know its
//! listener and a [`Target`] does not know its rule.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::{L4Protocol, L7Protocol, ListenerProtocol};
use crate::remote::{RemoteListener, RemoteRule};
use crate::SyncResult;

/// Health check settings for a layer-4 listener or a layer-7 rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Whether health checking is switched on.
    pub enabled: bool,
    /// Response timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u32>,
    /// Probe interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u32>,
    /// Consecutive successes before a target is healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy_threshold: Option<u32>,
    /// Consecutive failures before a target is unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_threshold: Option<u32>,
    /// Bitmask of HTTP status classes counted as healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u32>,
    /// Path probed by HTTP checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_check_path: Option<String>,
    /// Host header sent by HTTP checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_check_domain: Option<String>,
    /// Method used by HTTP checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_check_method: Option<String>,
}

impl HealthCheck {
    /// A health check that is switched on with remote defaults.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// Certificate settings for TLS-terminating listeners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// `UNIDIRECTIONAL` or `MUTUAL`.
    pub ssl_mode: String,
    /// Server certificate id.
    pub certificate_id: String,
    /// Client CA certificate id, for mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate_id: Option<String>,
}

/// What kind of backend a target is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetKind {
    /// A compute instance.
    #[default]
    Instance,
    /// An elastic network interface.
    Eni,
}

/// A backend registered with a listener or rule.
///
/// Targets have no mutable state: a target with a different weight is a
/// different target.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Instance (or interface) id.
    pub instance_id: String,
    /// Backend port.
    pub port: u16,
    /// Forwarding weight.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Backend kind.
    #[serde(default, rename = "type")]
    pub kind: TargetKind,
}

fn default_weight() -> u32 {
    10
}

impl Target {
    /// An instance target with the default weight.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: instance_id.into(),
            port,
            weight: default_weight(),
            kind: TargetKind::Instance,
        }
    }

    /// Set the weight.
    #[must_use]
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// A layer-7 forwarding rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Remote id of the rule. `None` in a desired configuration means
    /// "create a new rule".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    /// Host the rule matches.
    pub domain: String,
    /// Path the rule matches.
    pub url: String,
    /// Health check for the rule's targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Targets behind the rule.
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Rule {
    /// A new rule with no id, health check or targets.
    #[must_use]
    pub fn new(domain: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            location_id: None,
            domain: domain.into(),
            url: url.into(),
            health_check: None,
            targets: Vec::new(),
        }
    }

    /// Set the remote id.
    #[must_use]
    pub fn with_location_id(mut self, id: impl Into<String>) -> Self {
        self.location_id = Some(id.into());
        self
    }

    /// Set the health check.
    #[must_use]
    pub fn with_health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Add a target.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }
}

/// Layer-specific listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "camelCase")]
pub enum ListenerLayer {
    /// TCP/UDP listener; targets attach directly to the listener.
    #[serde(rename_all = "camelCase")]
    Layer4 {
        /// Transport protocol.
        protocol: L4Protocol,
        /// Listener-level health check.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        health_check: Option<HealthCheck>,
        /// Certificate, for `TCP_SSL`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        certificate: Option<Certificate>,
        /// Registered targets.
        #[serde(default)]
        targets: Vec<Target>,
    },
    /// HTTP/HTTPS listener; targets attach to forwarding rules.
    #[serde(rename_all = "camelCase")]
    Layer7 {
        /// Application protocol.
        protocol: L7Protocol,
        /// Certificate, for HTTPS.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        certificate: Option<Certificate>,
        /// Forwarding rules.
        #[serde(default)]
        rules: Vec<Rule>,
    },
}

/// A load balancer listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// Remote id of the listener. `None` in a desired configuration means
    /// "create a new listener".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Frontend port.
    pub port: u16,
    /// Layer-specific settings.
    #[serde(flatten)]
    pub layer: ListenerLayer,
}

impl Listener {
    /// A layer-4 listener with no id, health check or targets.
    #[must_use]
    pub fn layer4(protocol: L4Protocol, port: u16) -> Self {
        Self {
            listener_id: None,
            name: None,
            port,
            layer: ListenerLayer::Layer4 {
                protocol,
                health_check: None,
                certificate: None,
                targets: Vec::new(),
            },
        }
    }

    /// A layer-7 listener with no id, certificate or rules.
    #[must_use]
    pub fn layer7(protocol: L7Protocol, port: u16) -> Self {
        Self {
            listener_id: None,
            name: None,
            port,
            layer: ListenerLayer::Layer7 {
                protocol,
                certificate: None,
                rules: Vec::new(),
            },
        }
    }

    /// Set the remote id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.listener_id = Some(id.into());
        self
    }

    /// Set the health check. Ignored on layer-7 listeners, whose health
    /// checks live on their rules.
    #[must_use]
    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        if let ListenerLayer::Layer4 { health_check, .. } = &mut self.layer {
            *health_check = Some(check);
        }
        self
    }

    /// Add a target. Ignored on layer-7 listeners.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        if let ListenerLayer::Layer4 { targets, .. } = &mut self.layer {
            targets.push(target);
        }
        self
    }

    /// Add a rule. Ignored on layer-4 listeners.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        if let ListenerLayer::Layer7 { rules, .. } = &mut self.layer {
            rules.push(rule);
        }
        self
    }

    /// The tagged protocol.
    #[must_use]
    pub fn protocol(&self) -> ListenerProtocol {
        match &self.layer {
            ListenerLayer::Layer4 { protocol, .. } => ListenerProtocol::Layer4(*protocol),
            ListenerLayer::Layer7 { protocol, .. } => ListenerProtocol::Layer7(*protocol),
        }
    }

    /// The listener-level health check, layer-4 only.
    #[must_use]
    pub fn health_check(&self) -> Option<&HealthCheck> {
        match &self.layer {
            ListenerLayer::Layer4 { health_check, .. } => health_check.as_ref(),
            ListenerLayer::Layer7 { .. } => None,
        }
    }

    /// The certificate, if any.
    #[must_use]
    pub fn certificate(&self) -> Option<&Certificate> {
        match &self.layer {
            ListenerLayer::Layer4 { certificate, .. }
            | ListenerLayer::Layer7 { certificate, .. } => certificate.as_ref(),
        }
    }

    /// Targets attached directly to the listener (empty for layer-7).
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        match &self.layer {
            ListenerLayer::Layer4 { targets, .. } => targets,
            ListenerLayer::Layer7 { .. } => &[],
        }
    }

    /// Forwarding rules (empty for layer-4).
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        match &self.layer {
            ListenerLayer::Layer4 { .. } => &[],
            ListenerLayer::Layer7 { rules, .. } => rules,
        }
    }

    /// Every target behind the listener, from the listener or its rules.
    pub fn all_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets()
            .iter()
            .chain(self.rules().iter().flat_map(|r| r.targets.iter()))
    }

    /// Convert a raw remote listener, parsing its protocol string.
    ///
    /// Rules reported on a layer-4 listener and targets reported directly
    /// on a layer-7 listener are dropped with a warning.
    pub fn from_remote(remote: RemoteListener) -> SyncResult<Self> {
        let protocol: ListenerProtocol = remote.protocol.parse()?;
        let layer = match protocol {
            ListenerProtocol::Layer4(protocol) => {
                if !remote.rules.is_empty() {
                    warn!(
                        listener = %remote.listener_id,
                        rules = remote.rules.len(),
                        "ignoring rules reported on a layer-4 listener"
                    );
                }
                ListenerLayer::Layer4 {
                    protocol,
                    health_check: remote.health_check,
                    certificate: remote.certificate,
                    targets: remote.targets,
                }
            }
            ListenerProtocol::Layer7(protocol) => {
                if !remote.targets.is_empty() {
                    warn!(
                        listener = %remote.listener_id,
                        targets = remote.targets.len(),
                        "ignoring targets reported on a layer-7 listener"
                    );
                }
                ListenerLayer::Layer7 {
                    protocol,
                    certificate: remote.certificate,
                    rules: remote.rules.into_iter().map(Rule::from_remote).collect(),
                }
            }
        };

        Ok(Self {
            listener_id: Some(remote.listener_id),
            name: remote.name,
            port: remote.port,
            layer,
        })
    }
}

impl Rule {
    fn from_remote(remote: RemoteRule) -> Self {
        Self {
            location_id: Some(remote.location_id),
            domain: remote.domain,
            url: remote.url,
            health_check: remote.health_check,
            targets: remote.targets,
        }
    }
}
