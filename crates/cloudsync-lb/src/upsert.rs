//! Declarative load balancer upsert.
//!
//! [`LoadBalancerUpserter::upsert`] turns a desired listener tree into remote
//! mutations:
//!
//! 1. Validate the request. Nothing is submitted for an invalid request.
//! 2. Find the load balancer by id or name, creating it if absent.
//! 3. Read its actual listeners and [`plan`](crate::diff::plan) the changes.
//! 4. Apply listener deletes, updates and child changes, then listener
//!    creates. Under each listener rules go delete, update, create and
//!    targets are deregistered before new ones are registered.
//! 5. Ask the [`OnDemandTrigger`] to refresh the load balancer so the change
//!    shows up before the next full scan.
//!
//! Every sub-step is submitted once and polled to completion. A failed or
//! timed-out step is recorded and the upsert moves on to the next
//! independent step; steps that depend on it are recorded as skipped.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cloudsync_agent::{OnDemandKind, OnDemandRequest, Pipeline};
use cloudsync_core::{
    HealthCheck, ListFilter, Listener, Mutation, RemoteLister, RemoteMutator, Rule, Scope,
    StatusSink, SyncError, SyncResult, Target,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diff::{self, ListenerChanges, Plan, Reconcilable};
use crate::poller::{TaskOutcome, TaskPoller};

/// Phase name used for every progress line.
pub const PHASE: &str = "UPSERT_LOAD_BALANCER";

const LOAD_BALANCER_KINDS: [&str; 2] = ["OPEN", "INTERNAL"];

fn default_kind() -> String {
    "OPEN".to_string()
}

/// Desired state of one load balancer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertLoadBalancerRequest {
    /// Account.
    pub account: String,
    /// Region.
    pub region: String,
    /// Existing load balancer. When absent the load balancer is looked up by
    /// name and created if missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_id: Option<String>,
    /// Name, used for lookup and creation.
    #[serde(default)]
    pub load_balancer_name: String,
    /// `OPEN` or `INTERNAL`.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Network for a new load balancer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    /// Subnet for a new load balancer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    /// Security groups for a new load balancer.
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// The complete desired listener set. Listeners not listed are deleted.
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

impl UpsertLoadBalancerRequest {
    /// A request for a load balancer identified by name.
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
        load_balancer_name: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            load_balancer_id: None,
            load_balancer_name: load_balancer_name.into(),
            kind: default_kind(),
            network_id: None,
            subnet_id: None,
            security_group_ids: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Target an existing load balancer by id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.load_balancer_id = Some(id.into());
        self
    }

    /// Add a desired listener.
    #[must_use]
    pub fn listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The (account, region) the request targets.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(&self.account, &self.region)
    }

    /// Check required fields and the desired tree.
    pub fn validate(&self) -> SyncResult<()> {
        fn invalid(field: &str, reason: impl Into<String>) -> SyncError {
            SyncError::InvalidRequest {
                field: field.to_string(),
                reason: reason.into(),
            }
        }

        if self.account.is_empty() {
            return Err(invalid("account", "must not be empty"));
        }
        if self.region.is_empty() {
            return Err(invalid("region", "must not be empty"));
        }
        let has_id = self.load_balancer_id.as_deref().is_some_and(|id| !id.is_empty());
        if !has_id && self.load_balancer_name.is_empty() {
            return Err(invalid(
                "loadBalancerName",
                "either a load balancer id or a name is required",
            ));
        }
        if !LOAD_BALANCER_KINDS.contains(&self.kind.as_str()) {
            return Err(invalid("kind", format!("unsupported kind {:?}", self.kind)));
        }

        for listener in &self.listeners {
            if listener.port == 0 {
                return Err(invalid("listeners", "port must not be zero"));
            }
            for rule in listener.rules() {
                if rule.domain.is_empty() || rule.url.is_empty() {
                    return Err(invalid("rules", "domain and url are required"));
                }
            }
            if listener.all_targets().any(|t| t.instance_id.is_empty() || t.port == 0) {
                return Err(invalid("targets", "instance id and port are required"));
            }
        }
        diff::check_desired(&self.listeners)
    }
}

/// Result of one sub-step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "camelCase")]
pub enum StepOutcome {
    /// Completed.
    Succeeded,
    /// Rejected on submit or reported failed.
    Failed(String),
    /// Polling gave up. The change may still land.
    TimedOut,
    /// Not attempted because a step it depends on did not succeed.
    Skipped(String),
}

impl StepOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timedOut",
            Self::Skipped(_) => "skipped",
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::TimedOut => f.write_str("timed out, outcome unknown"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

/// One recorded sub-step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    /// Mutation name, e.g. `createListener`.
    pub mutation: &'static str,
    /// What the mutation acted on.
    pub subject: String,
    /// How it ended.
    pub outcome: StepOutcome,
}

/// Result of an upsert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    /// The load balancer acted on.
    pub load_balancer_id: String,
    /// Whether the load balancer was created by this upsert.
    pub created: bool,
    /// Sub-steps in submission order.
    pub steps: Vec<StepReport>,
    /// Whether an on-demand refresh was stored.
    pub refreshed: bool,
}

impl UpsertOutcome {
    /// Whether every sub-step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome == StepOutcome::Succeeded)
    }

    /// Whether any sub-step has an unknown outcome.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.steps.iter().any(|s| s.outcome == StepOutcome::TimedOut)
    }

    /// Sub-steps that did not succeed.
    pub fn problems(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.outcome != StepOutcome::Succeeded)
    }

    /// Mutation names in submission order, skipped steps excluded.
    #[must_use]
    pub fn submitted(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| !matches!(s.outcome, StepOutcome::Skipped(_)))
            .map(|s| s.mutation)
            .collect()
    }
}

/// Callback that refreshes a load balancer in the cache after an upsert.
#[async_trait]
pub trait OnDemandTrigger: Send + Sync {
    /// Refresh one load balancer. Returns whether a refresh was stored.
    async fn refresh_load_balancer(&self, scope: &Scope, load_balancer_id: &str)
        -> SyncResult<bool>;
}

#[async_trait]
impl OnDemandTrigger for Pipeline {
    async fn refresh_load_balancer(
        &self,
        scope: &Scope,
        load_balancer_id: &str,
    ) -> SyncResult<bool> {
        let request = OnDemandRequest::new(
            OnDemandKind::LoadBalancer,
            &scope.account,
            &scope.region,
            load_balancer_id,
        );
        Ok(self.handle_on_demand(&request).await?.is_some())
    }
}

/// Applies [`UpsertLoadBalancerRequest`]s against a remote account.
#[derive(Clone)]
pub struct LoadBalancerUpserter {
    lister: Arc<dyn RemoteLister>,
    mutator: Arc<dyn RemoteMutator>,
    poller: TaskPoller,
    trigger: Option<Arc<dyn OnDemandTrigger>>,
}

impl fmt::Debug for LoadBalancerUpserter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancerUpserter")
            .field("poller", &self.poller)
            .field("trigger", &self.trigger.is_some())
            .finish_non_exhaustive()
    }
}

impl LoadBalancerUpserter {
    /// Create an upserter with the default poller and no refresh trigger.
    pub fn new(lister: Arc<dyn RemoteLister>, mutator: Arc<dyn RemoteMutator>) -> Self {
        Self {
            lister,
            mutator,
            poller: TaskPoller::default(),
            trigger: None,
        }
    }

    /// Use a specific poller.
    #[must_use]
    pub fn with_poller(mut self, poller: TaskPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Refresh through `trigger` after each upsert.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Arc<dyn OnDemandTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Bring one load balancer to the requested state.
    ///
    /// Returns an error for an invalid request, or when the load balancer
    /// can be neither found nor created. Failures of later sub-steps are
    /// reported in the [`UpsertOutcome`].
    pub async fn upsert(
        &self,
        request: &UpsertLoadBalancerRequest,
        sink: &dyn StatusSink,
    ) -> SyncResult<UpsertOutcome> {
        request.validate()?;
        let scope = request.scope();
        let name = request
            .load_balancer_id
            .as_deref()
            .unwrap_or(&request.load_balancer_name);
        sink.update(
            PHASE,
            &format!("Initializing upsert of load balancer {name} in {scope}"),
        );

        let mut run = Run {
            mutator: self.mutator.as_ref(),
            poller: self.poller,
            scope: &scope,
            sink,
            steps: Vec::new(),
        };

        let (load_balancer_id, actual, created) = self.resolve(request, &mut run).await?;
        let plan = diff::plan(&actual, &request.listeners)?;
        if plan.is_empty() {
            sink.update(PHASE, &format!("Listeners of {load_balancer_id} are up to date"));
        } else {
            run.apply(&load_balancer_id, plan).await;
        }
        let steps = run.steps;

        let refreshed = self.refresh(&scope, &load_balancer_id, sink).await;
        let outcome = UpsertOutcome {
            load_balancer_id,
            created,
            steps,
            refreshed,
        };
        info!(
            %scope,
            load_balancer = %outcome.load_balancer_id,
            steps = outcome.steps.len(),
            success = outcome.is_success(),
            "upsert finished"
        );
        sink.update(
            PHASE,
            &format!("Done upserting load balancer {}", outcome.load_balancer_id),
        );
        Ok(outcome)
    }

    /// Find or create the load balancer and read its listeners.
    async fn resolve(
        &self,
        request: &UpsertLoadBalancerRequest,
        run: &mut Run<'_>,
    ) -> SyncResult<(String, Vec<Listener>, bool)> {
        let scope = run.scope;

        if let Some(id) = request.load_balancer_id.as_deref().filter(|id| !id.is_empty()) {
            let existing = self
                .lister
                .list_load_balancers(scope, &ListFilter::by_id(id))
                .await?
                .into_iter()
                .find(|lb| lb.id == id)
                .ok_or_else(|| SyncError::InvalidRequest {
                    field: "loadBalancerId".to_string(),
                    reason: format!("load balancer {id} does not exist in {scope}"),
                })?;
            return Ok((existing.id, actual_listeners(existing.listeners), false));
        }

        let name = &request.load_balancer_name;
        let existing = self
            .lister
            .list_load_balancers(scope, &ListFilter::by_name(name))
            .await?
            .into_iter()
            .find(|lb| &lb.name == name);
        if let Some(existing) = existing {
            debug!(%scope, id = %existing.id, %name, "found load balancer by name");
            return Ok((existing.id, actual_listeners(existing.listeners), false));
        }

        let mutation = Mutation::CreateLoadBalancer {
            name: name.clone(),
            kind: request.kind.clone(),
            network_id: request.network_id.clone(),
            subnet_id: request.subnet_id.clone(),
            security_group_ids: request.security_group_ids.clone(),
        };
        let created = run.submit(mutation, format!("load balancer {name}")).await?;
        let id = created.into_iter().next().ok_or_else(|| {
            SyncError::remote("createLoadBalancer", "no load balancer id was returned")
        })?;
        Ok((id, Vec::new(), true))
    }

    async fn refresh(&self, scope: &Scope, load_balancer_id: &str, sink: &dyn StatusSink) -> bool {
        let Some(trigger) = &self.trigger else {
            return false;
        };
        sink.update(
            PHASE,
            &format!("Refreshing cache for load balancer {load_balancer_id}"),
        );
        match trigger.refresh_load_balancer(scope, load_balancer_id).await {
            Ok(stored) => {
                if !stored {
                    warn!(%scope, load_balancer = load_balancer_id, "refresh was not stored");
                }
                stored
            }
            Err(error) => {
                warn!(%scope, load_balancer = load_balancer_id, %error, "refresh failed");
                false
            }
        }
    }
}

fn actual_listeners(remote: Vec<cloudsync_core::remote::RemoteListener>) -> Vec<Listener> {
    remote
        .into_iter()
        .filter_map(|listener| {
            let id = listener.listener_id.clone();
            match Listener::from_remote(listener) {
                Ok(listener) => Some(listener),
                Err(error) => {
                    warn!(listener = %id, %error, "ignoring unreadable listener");
                    None
                }
            }
        })
        .collect()
}

fn listener_subject(listener: &Listener) -> String {
    let slot = format!("{}:{}", listener.protocol(), listener.port);
    match &listener.listener_id {
        Some(id) => format!("listener {slot} ({id})"),
        None => format!("listener {slot}"),
    }
}

fn rule_subject(rule: &Rule) -> String {
    format!("rule {}{}", rule.domain, rule.url)
}

fn targets_subject(targets: &[Target], listener_id: &str, location_id: Option<&str>) -> String {
    let backends = targets
        .iter()
        .map(|t| format!("{}:{}", t.instance_id, t.port))
        .collect::<Vec<_>>()
        .join(", ");
    match location_id {
        Some(location_id) => format!("[{backends}] on {listener_id}/{location_id}"),
        None => format!("[{backends}] on {listener_id}"),
    }
}

/// State of one upsert in flight.
struct Run<'a> {
    mutator: &'a dyn RemoteMutator,
    poller: TaskPoller,
    scope: &'a Scope,
    sink: &'a dyn StatusSink,
    steps: Vec<StepReport>,
}

impl Run<'_> {
    /// Submit and poll one mutation, recording the step. Returns the created
    /// resource ids when the step succeeded.
    async fn step(&mut self, mutation: Mutation, subject: String) -> Option<Vec<String>> {
        match self.submit(mutation, subject).await {
            Ok(ids) => Some(ids),
            Err(_) => None,
        }
    }

    async fn submit(&mut self, mutation: Mutation, subject: String) -> SyncResult<Vec<String>> {
        let name = mutation.name();
        self.sink.update(PHASE, &format!("{name} {subject}"));

        let (outcome, result) = match self.mutator.submit(self.scope, mutation).await {
            Err(error) => (StepOutcome::Failed(error.to_string()), Err(error)),
            Ok(submission) => {
                match self.poller.wait(self.mutator, self.scope, &submission.task).await {
                    Ok(TaskOutcome::Succeeded) => {
                        (StepOutcome::Succeeded, Ok(submission.resource_ids))
                    }
                    Ok(TaskOutcome::Failed(reason)) => (
                        StepOutcome::Failed(reason.clone()),
                        Err(SyncError::TaskFailed {
                            task_id: submission.task.to_string(),
                            message: reason,
                        }),
                    ),
                    Ok(TaskOutcome::TimedOut) => (
                        StepOutcome::TimedOut,
                        Err(SyncError::TaskTimeout {
                            task_id: submission.task.to_string(),
                            attempts: self.poller.max_attempts(),
                        }),
                    ),
                    Err(error) => (StepOutcome::Failed(error.to_string()), Err(error)),
                }
            }
        };

        metrics::counter!(
            "cloudsync_upsert_steps_total",
            "mutation" => name,
            "outcome" => outcome.as_str()
        )
        .increment(1);
        if outcome != StepOutcome::Succeeded {
            warn!(scope = %self.scope, mutation = name, %subject, %outcome, "upsert step did not succeed");
            self.sink.update(PHASE, &format!("{name} {subject} {outcome}"));
        }
        self.steps.push(StepReport {
            mutation: name,
            subject,
            outcome,
        });
        result
    }

    fn skip(&mut self, mutation: &'static str, subject: String, reason: &str) {
        debug!(mutation, %subject, reason, "skipping upsert step");
        self.steps.push(StepReport {
            mutation,
            subject,
            outcome: StepOutcome::Skipped(reason.to_string()),
        });
    }

    async fn apply(&mut self, load_balancer_id: &str, plan: Plan) {
        let Plan { listeners, matched } = plan;

        for listener in &listeners.to_delete {
            let Some(listener_id) = listener.listener_id.clone() else {
                continue;
            };
            let subject = listener_subject(listener);
            self.step(
                Mutation::DeleteListener {
                    load_balancer_id: load_balancer_id.to_string(),
                    listener_id,
                },
                subject,
            )
            .await;
        }

        for listener in &listeners.to_update {
            let (Some(listener_id), Some(health_check)) =
                (listener.listener_id.clone(), listener.health_check().cloned())
            else {
                continue;
            };
            let subject = listener_subject(listener);
            self.step(
                Mutation::ModifyListener {
                    load_balancer_id: load_balancer_id.to_string(),
                    listener_id,
                    health_check,
                },
                subject,
            )
            .await;
        }

        for changes in matched {
            self.apply_children(load_balancer_id, changes).await;
        }

        for listener in &listeners.to_create {
            self.create_listener(load_balancer_id, listener).await;
        }
    }

    async fn apply_children(&mut self, load_balancer_id: &str, changes: ListenerChanges) {
        let ListenerChanges {
            listener_id,
            targets,
            rules,
            rule_targets,
        } = changes;

        for rule in &rules.to_delete {
            let Some(location_id) = rule.location_id.clone() else {
                continue;
            };
            self.step(
                Mutation::DeleteRule {
                    load_balancer_id: load_balancer_id.to_string(),
                    listener_id: listener_id.clone(),
                    location_id,
                },
                rule_subject(rule),
            )
            .await;
        }

        for rule in &rules.to_update {
            let (Some(location_id), Some(health_check)) =
                (rule.location_id.clone(), rule.health_check.clone())
            else {
                continue;
            };
            self.modify_rule(load_balancer_id, &listener_id, location_id, health_check, rule)
                .await;
        }

        self.deregister(load_balancer_id, &listener_id, None, targets.to_delete)
            .await;
        for changed in &rule_targets {
            self.deregister(
                load_balancer_id,
                &listener_id,
                Some(&changed.location_id),
                changed.targets.to_delete.clone(),
            )
            .await;
        }

        for rule in &rules.to_create {
            self.create_rule(load_balancer_id, &listener_id, rule).await;
        }

        self.register(load_balancer_id, &listener_id, None, targets.to_create)
            .await;
        for changed in rule_targets {
            self.register(
                load_balancer_id,
                &listener_id,
                Some(&changed.location_id),
                changed.targets.to_create,
            )
            .await;
        }
    }

    async fn modify_rule(
        &mut self,
        load_balancer_id: &str,
        listener_id: &str,
        location_id: String,
        health_check: HealthCheck,
        rule: &Rule,
    ) {
        self.step(
            Mutation::ModifyRule {
                load_balancer_id: load_balancer_id.to_string(),
                listener_id: listener_id.to_string(),
                location_id,
                health_check,
            },
            rule_subject(rule),
        )
        .await;
    }

    async fn create_listener(&mut self, load_balancer_id: &str, listener: &Listener) {
        let subject = listener_subject(listener);
        let created = self
            .step(
                Mutation::CreateListener {
                    load_balancer_id: load_balancer_id.to_string(),
                    name: listener.name.clone(),
                    protocol: listener.protocol().to_string(),
                    port: listener.port,
                    health_check: listener.health_check().cloned(),
                    certificate: listener.certificate().cloned(),
                },
                subject.clone(),
            )
            .await;

        let listener_id = created.and_then(|ids| ids.into_iter().next());
        let Some(listener_id) = listener_id else {
            let reason = format!("{subject} was not created");
            if !listener.targets().is_empty() {
                self.skip(
                    "registerTargets",
                    format!("{} on {subject}", listener.targets().len()),
                    &reason,
                );
            }
            for rule in sorted_rules(listener.rules()) {
                self.skip("createRule", rule_subject(rule), &reason);
            }
            return;
        };

        let mut targets = listener.targets().to_vec();
        targets.sort();
        self.register(load_balancer_id, &listener_id, None, targets)
            .await;
        for rule in sorted_rules(listener.rules()) {
            self.create_rule(load_balancer_id, &listener_id, rule).await;
        }
    }

    async fn create_rule(&mut self, load_balancer_id: &str, listener_id: &str, rule: &Rule) {
        let subject = rule_subject(rule);
        let created = self
            .step(
                Mutation::CreateRule {
                    load_balancer_id: load_balancer_id.to_string(),
                    listener_id: listener_id.to_string(),
                    domain: rule.domain.clone(),
                    url: rule.url.clone(),
                    health_check: rule.health_check.clone(),
                },
                subject.clone(),
            )
            .await;

        let location_id = created.and_then(|ids| ids.into_iter().next());
        let mut targets = rule.targets.clone();
        targets.sort();
        match location_id {
            Some(location_id) => {
                self.register(load_balancer_id, listener_id, Some(&location_id), targets)
                    .await;
            }
            None if !targets.is_empty() => {
                self.skip(
                    "registerTargets",
                    format!("{} on {subject}", targets.len()),
                    &format!("{subject} was not created"),
                );
            }
            None => {}
        }
    }

    async fn register(
        &mut self,
        load_balancer_id: &str,
        listener_id: &str,
        location_id: Option<&str>,
        targets: Vec<Target>,
    ) {
        if targets.is_empty() {
            return;
        }
        let subject = targets_subject(&targets, listener_id, location_id);
        self.step(
            Mutation::RegisterTargets {
                load_balancer_id: load_balancer_id.to_string(),
                listener_id: listener_id.to_string(),
                location_id: location_id.map(str::to_string),
                targets,
            },
            subject,
        )
        .await;
    }

    async fn deregister(
        &mut self,
        load_balancer_id: &str,
        listener_id: &str,
        location_id: Option<&str>,
        targets: Vec<Target>,
    ) {
        if targets.is_empty() {
            return;
        }
        let subject = targets_subject(&targets, listener_id, location_id);
        self.step(
            Mutation::DeregisterTargets {
                load_balancer_id: load_balancer_id.to_string(),
                listener_id: listener_id.to_string(),
                location_id: location_id.map(str::to_string),
                targets,
            },
            subject,
        )
        .await;
    }
}

fn sorted_rules(rules: &[Rule]) -> Vec<&Rule> {
    let mut rules: Vec<&Rule> = rules.iter().collect();
    rules.sort_by_key(|r| r.slot());
    rules
}
