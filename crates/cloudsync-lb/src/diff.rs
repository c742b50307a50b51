//! Desired-versus-actual diffs for listeners, rules and targets.
//!
//! Each entity kind implements [`Reconcilable`]:
//!
//! - **identity**: the remote id (`listener_id`, `location_id`). A desired
//!   entity without one is always created. Targets have no id; their whole
//!   value is the identity, so a changed weight is a delete plus a create.
//! - **slot**: what the remote side enforces uniqueness on (protocol + port,
//!   domain + url, instance + port). Two desired entities in one slot are
//!   rejected, and so is a desired entity that keeps an actual id but moves
//!   to another slot: the caller has to delete and recreate it.
//! - **changed**: the fields compared for an in-place update. Listeners and
//!   rules compare health checks only; everything else needs a recreate.
//!
//! [`plan`] applies the diff hierarchically: rule and target diffs are only
//! computed under listeners present on both sides.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use cloudsync_core::{Listener, ListenerProtocol, Rule, SyncError, SyncResult, Target};
use tracing::warn;

/// An entity that can be diffed.
pub trait Reconcilable: Clone {
    /// Remote identity.
    type Key: Ord + Clone + Debug;
    /// Remote uniqueness constraint.
    type Slot: Ord + Clone + Debug;

    /// Name used in validation errors.
    const KIND: &'static str;

    /// The identity, or `None` for "create new".
    fn identity(&self) -> Option<Self::Key>;

    /// The uniqueness slot.
    fn slot(&self) -> Self::Slot;

    /// Whether `self`, the desired state, differs from `actual` in a field
    /// that can be updated in place.
    fn changed(&self, actual: &Self) -> bool;
}

fn health_check_changed(
    desired: Option<&cloudsync_core::HealthCheck>,
    actual: Option<&cloudsync_core::HealthCheck>,
) -> bool {
    desired.is_some_and(|d| actual != Some(d))
}

impl Reconcilable for Listener {
    type Key = String;
    type Slot = (ListenerProtocol, u16);

    const KIND: &'static str = "listeners";

    fn identity(&self) -> Option<String> {
        self.listener_id.clone().filter(|id| !id.is_empty())
    }

    fn slot(&self) -> Self::Slot {
        (self.protocol(), self.port)
    }

    fn changed(&self, actual: &Self) -> bool {
        health_check_changed(self.health_check(), actual.health_check())
    }
}

impl Reconcilable for Rule {
    type Key = String;
    type Slot = (String, String);

    const KIND: &'static str = "rules";

    fn identity(&self) -> Option<String> {
        self.location_id.clone().filter(|id| !id.is_empty())
    }

    fn slot(&self) -> Self::Slot {
        (self.domain.clone(), self.url.clone())
    }

    fn changed(&self, actual: &Self) -> bool {
        health_check_changed(self.health_check.as_ref(), actual.health_check.as_ref())
    }
}

impl Reconcilable for Target {
    type Key = Target;
    type Slot = (String, u16);

    const KIND: &'static str = "targets";

    fn identity(&self) -> Option<Target> {
        Some(self.clone())
    }

    fn slot(&self) -> Self::Slot {
        (self.instance_id.clone(), self.port)
    }

    fn changed(&self, _actual: &Self) -> bool {
        false
    }
}

/// The operations turning `actual` into `desired`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diff<T> {
    /// Desired entities to create, by slot.
    pub to_create: Vec<T>,
    /// Desired entities whose compared fields changed, by identity.
    pub to_update: Vec<T>,
    /// Actual entities no longer desired, by identity.
    pub to_delete: Vec<T>,
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            to_create: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
        }
    }
}

impl<T> Diff<T> {
    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Diff two lists of one entity kind.
///
/// The result does not depend on the order of either input.
pub fn diff<T: Reconcilable>(actual: &[T], desired: &[T]) -> SyncResult<Diff<T>> {
    check_unique(desired)?;

    let by_identity: BTreeMap<T::Key, &T> = actual
        .iter()
        .filter_map(|a| a.identity().map(|key| (key, a)))
        .collect();

    let mut out = Diff::default();
    let mut matched = BTreeSet::new();
    for wanted in desired {
        match wanted.identity().and_then(|key| by_identity.get_key_value(&key)) {
            Some((key, current)) => {
                if wanted.slot() != current.slot() {
                    warn!(
                        kind = T::KIND,
                        id = ?key,
                        desired = ?wanted.slot(),
                        actual = ?current.slot(),
                        "slot change requested for an existing id"
                    );
                    return Err(SyncError::InvalidRequest {
                        field: T::KIND.to_string(),
                        reason: format!(
                            "{key:?} cannot move from {:?} to {:?}; delete and recreate it",
                            current.slot(),
                            wanted.slot()
                        ),
                    });
                }
                matched.insert(key.clone());
                if wanted.changed(current) {
                    out.to_update.push(wanted.clone());
                }
            }
            None => out.to_create.push(wanted.clone()),
        }
    }
    out.to_delete = by_identity
        .into_iter()
        .filter(|(key, _)| !matched.contains(key))
        .map(|(_, current)| current.clone())
        .collect();

    out.to_create.sort_by_key(|t| t.slot());
    out.to_update.sort_by_key(|t| t.identity());
    Ok(out)
}

fn check_unique<T: Reconcilable>(desired: &[T]) -> SyncResult<()> {
    let mut slots = BTreeSet::new();
    let mut identities = BTreeSet::new();
    for wanted in desired {
        if !slots.insert(wanted.slot()) {
            return Err(SyncError::InvalidRequest {
                field: T::KIND.to_string(),
                reason: format!("{:?} is requested more than once", wanted.slot()),
            });
        }
        if let Some(key) = wanted.identity() {
            if !identities.insert(key.clone()) {
                return Err(SyncError::InvalidRequest {
                    field: T::KIND.to_string(),
                    reason: format!("{key:?} is requested more than once"),
                });
            }
        }
    }
    Ok(())
}

/// Reject duplicate slots or identities anywhere in a desired listener tree.
pub fn check_desired(listeners: &[Listener]) -> SyncResult<()> {
    check_unique(listeners)?;
    for listener in listeners {
        check_unique(listener.targets())?;
        check_unique(listener.rules())?;
        for rule in listener.rules() {
            check_unique(&rule.targets)?;
        }
    }
    Ok(())
}

/// Child changes under a rule present on both sides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleTargets {
    /// The rule.
    pub location_id: String,
    /// Target changes.
    pub targets: Diff<Target>,
}

/// Child changes under a listener present on both sides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerChanges {
    /// The listener.
    pub listener_id: String,
    /// Target changes, layer-4 only.
    pub targets: Diff<Target>,
    /// Rule changes, layer-7 only.
    pub rules: Diff<Rule>,
    /// Target changes under matched rules, by location id.
    pub rule_targets: Vec<RuleTargets>,
}

impl ListenerChanges {
    /// Whether nothing under the listener changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
            && self.rules.is_empty()
            && self.rule_targets.iter().all(|r| r.targets.is_empty())
    }
}

/// The full change set for a load balancer's listeners.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Listener-level changes.
    pub listeners: Diff<Listener>,
    /// Child changes under listeners present on both sides, by listener id.
    pub matched: Vec<ListenerChanges>,
}

impl Plan {
    /// Whether applying the plan would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.matched.iter().all(ListenerChanges::is_empty)
    }
}

/// Diff listeners, then rules and targets under listeners on both sides.
pub fn plan(actual: &[Listener], desired: &[Listener]) -> SyncResult<Plan> {
    let listeners = diff(actual, desired)?;

    let mut matched = Vec::new();
    for wanted in desired {
        let Some(id) = wanted.identity() else {
            continue;
        };
        let Some(current) = actual.iter().find(|a| a.identity().as_ref() == Some(&id)) else {
            continue;
        };

        let rules = diff(current.rules(), wanted.rules())?;
        let mut rule_targets = Vec::new();
        for rule in wanted.rules() {
            let Some(location_id) = rule.identity() else {
                continue;
            };
            if let Some(existing) = current
                .rules()
                .iter()
                .find(|r| r.identity().as_ref() == Some(&location_id))
            {
                rule_targets.push(RuleTargets {
                    location_id,
                    targets: diff(&existing.targets, &rule.targets)?,
                });
            }
        }
        rule_targets.sort_by(|a, b| a.location_id.cmp(&b.location_id));

        matched.push(ListenerChanges {
            listener_id: id,
            targets: diff(current.targets(), wanted.targets())?,
            rules,
            rule_targets,
        });
    }
    matched.sort_by(|a, b| a.listener_id.cmp(&b.listener_id));

    Ok(Plan { listeners, matched })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_core::{HealthCheck, L4Protocol, L7Protocol};

    #[test]
    fn listener_health_check_update_and_new_listener() {
        let actual = vec![Listener::layer4(L4Protocol::Tcp, 80).with_id("L1")];
        let desired = vec![
            Listener::layer4(L4Protocol::Tcp, 80)
                .with_id("L1")
                .with_health_check(HealthCheck::enabled()),
            Listener::layer7(L7Protocol::Http, 8080).with_rule(Rule::new("a.com", "/")),
        ];

        let diff = diff(&actual, &desired).unwrap();

        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(diff.to_update[0].listener_id.as_deref(), Some("L1"));
        assert_eq!(diff.to_create.len(), 1);
        assert_eq!(diff.to_create[0].protocol(), ListenerProtocol::HTTP);
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn weight_change_is_delete_then_create() {
        let actual = vec![Target::new("i-1", 80).weight(10)];
        let desired = vec![Target::new("i-1", 80).weight(20)];

        let diff = diff(&actual, &desired).unwrap();

        assert_eq!(diff.to_delete, vec![Target::new("i-1", 80).weight(10)]);
        assert_eq!(diff.to_create, vec![Target::new("i-1", 80).weight(20)]);
        assert!(diff.to_update.is_empty());
    }

    #[test]
    fn unmatched_actual_is_deleted_and_missing_id_always_creates() {
        let actual = vec![
            Rule::new("a.com", "/").with_location_id("loc-1"),
            Rule::new("b.com", "/").with_location_id("loc-2"),
        ];
        // Same slot as loc-1 but no id: loc-1 goes away, a new rule is made.
        let desired = vec![
            Rule::new("a.com", "/"),
            Rule::new("b.com", "/").with_location_id("loc-2"),
        ];

        let diff = diff(&actual, &desired).unwrap();

        assert_eq!(diff.to_delete.len(), 1);
        assert_eq!(diff.to_delete[0].location_id.as_deref(), Some("loc-1"));
        assert_eq!(diff.to_create.len(), 1);
        assert!(diff.to_create[0].location_id.is_none());
        assert!(diff.to_update.is_empty());
    }

    #[test]
    fn unknown_desired_id_is_created() {
        let actual: Vec<Rule> = Vec::new();
        let desired = vec![Rule::new("a.com", "/").with_location_id("loc-gone")];

        let diff = diff(&actual, &desired).unwrap();
        assert_eq!(diff.to_create.len(), 1);
    }

    #[test]
    fn missing_desired_health_check_means_unchanged() {
        let actual = vec![Rule::new("a.com", "/")
            .with_location_id("loc-1")
            .with_health_check(HealthCheck::enabled())];
        let desired = vec![Rule::new("a.com", "/").with_location_id("loc-1")];

        assert!(diff(&actual, &desired).unwrap().is_empty());
    }

    #[test]
    fn duplicate_slots_are_rejected() {
        let desired = vec![
            Listener::layer4(L4Protocol::Tcp, 80),
            Listener::layer4(L4Protocol::Tcp, 80),
        ];
        let err = diff::<Listener>(&[], &desired).unwrap_err();
        assert!(err.is_contract_violation());

        let desired = vec![Target::new("i-1", 80).weight(1), Target::new("i-1", 80).weight(2)];
        assert!(diff::<Target>(&[], &desired).is_err());
    }

    #[test]
    fn result_is_independent_of_input_order() {
        let actual = vec![
            Target::new("i-1", 80),
            Target::new("i-2", 80),
            Target::new("i-3", 80),
        ];
        let desired = vec![
            Target::new("i-4", 80),
            Target::new("i-2", 80),
            Target::new("i-5", 81),
        ];
        let mut actual_rev = actual.clone();
        actual_rev.reverse();
        let mut desired_rev = desired.clone();
        desired_rev.reverse();

        assert_eq!(diff(&actual, &desired).unwrap(), diff(&actual_rev, &desired_rev).unwrap());
    }

    #[test]
    fn applying_target_diff_yields_desired() {
        let actual = vec![
            Target::new("i-1", 80),
            Target::new("i-2", 80).weight(5),
            Target::new("i-3", 8080),
        ];
        let desired = vec![
            Target::new("i-2", 80).weight(50),
            Target::new("i-3", 8080),
            Target::new("i-9", 80),
        ];

        let diff = diff(&actual, &desired).unwrap();
        let mut applied: BTreeSet<Target> = actual.into_iter().collect();
        for gone in &diff.to_delete {
            assert!(applied.remove(gone));
        }
        applied.extend(diff.to_create.iter().cloned());

        assert_eq!(applied, desired.into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn plan_descends_into_matched_listeners_only() {
        let actual = vec![
            Listener::layer7(L7Protocol::Http, 80).with_id("L1").with_rule(
                Rule::new("a.com", "/")
                    .with_location_id("loc-1")
                    .with_target(Target::new("i-1", 8080)),
            ),
            Listener::layer4(L4Protocol::Tcp, 22)
                .with_id("L2")
                .with_target(Target::new("i-1", 22)),
        ];
        let desired = vec![
            Listener::layer7(L7Protocol::Http, 80)
                .with_id("L1")
                .with_rule(
                    Rule::new("a.com", "/")
                        .with_location_id("loc-1")
                        .with_target(Target::new("i-2", 8080)),
                )
                .with_rule(Rule::new("a.com", "/api")),
            Listener::layer4(L4Protocol::Udp, 53).with_target(Target::new("i-1", 53)),
        ];

        let plan = plan(&actual, &desired).unwrap();

        assert_eq!(plan.listeners.to_delete.len(), 1);
        assert_eq!(plan.listeners.to_create.len(), 1);
        assert_eq!(plan.matched.len(), 1);
        let l1 = &plan.matched[0];
        assert_eq!(l1.listener_id, "L1");
        assert_eq!(l1.rules.to_create.len(), 1);
        assert_eq!(l1.rule_targets.len(), 1);
        assert_eq!(l1.rule_targets[0].targets.to_delete, vec![Target::new("i-1", 8080)]);
        assert_eq!(l1.rule_targets[0].targets.to_create, vec![Target::new("i-2", 8080)]);
        assert!(!plan.is_empty());
    }

    #[test]
    fn layer_change_under_existing_id_is_rejected() {
        let actual = vec![Listener::layer4(L4Protocol::Tcp, 80)
            .with_id("L1")
            .with_target(Target::new("i-1", 80))
            .with_target(Target::new("i-2", 80))];
        let desired = vec![Listener::layer7(L7Protocol::Http, 80)
            .with_id("L1")
            .with_rule(Rule::new("a.com", "/"))];

        let err = plan(&actual, &desired).unwrap_err();
        assert!(
            matches!(err, SyncError::InvalidRequest { ref field, .. } if field == "listeners"),
            "{err}"
        );

        let moved_port = vec![Listener::layer4(L4Protocol::Tcp, 8080).with_id("L1")];
        assert!(diff(&actual, &moved_port).unwrap_err().is_contract_violation());
    }

    #[test]
    fn rule_keeping_id_with_new_domain_is_rejected() {
        let actual = vec![Rule::new("a.com", "/").with_location_id("loc-1")];
        let desired = vec![Rule::new("b.com", "/").with_location_id("loc-1")];

        let err = diff(&actual, &desired).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest { ref field, .. } if field == "rules"));
    }

    #[test]
    fn plan_for_identical_sides_is_empty() {
        let listeners = vec![Listener::layer4(L4Protocol::Tcp, 80)
            .with_id("L1")
            .with_health_check(HealthCheck::enabled())
            .with_target(Target::new("i-1", 80))];
        assert!(plan(&listeners, &listeners).unwrap().is_empty());
    }
}
