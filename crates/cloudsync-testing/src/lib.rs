//! # cloudsync-testing
//!
//! An in-memory cloud implementing [`RemoteLister`] and [`RemoteMutator`].
//!
//! Resources are seeded per [`Scope`] with the `add_*` methods. Mutations
//! take effect when they are submitted and return a task that can be made
//! to lag, fail or never finish, so the upsert engine's timeout and failure
//! paths can be driven from tests.
//!
//! ```rust
//! use cloudsync_core::remote::RemoteSecurityGroup;
//! use cloudsync_core::Scope;
//! use cloudsync_testing::InMemoryCloud;
//!
//! let cloud = InMemoryCloud::new();
//! let scope = Scope::new("prod", "region1");
//! cloud.add_security_group(&scope, RemoteSecurityGroup {
//!     id: "sg-1".into(),
//!     name: "web".into(),
//!     ..Default::default()
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use cloudsync_core::remote::{
    RemoteImage, RemoteInstance, RemoteInstanceType, RemoteKeyPair, RemoteListener,
    RemoteLoadBalancer, RemoteNetwork, RemoteRule, RemoteSecurityGroup, RemoteServerGroup,
    RemoteSubnet,
};
use cloudsync_core::{
    ListFilter, Mutation, RemoteLister, RemoteMutator, Scope, Submission, SyncError, SyncResult,
    Target, TaskHandle, TaskStatus,
};
use tracing::debug;

/// Resources of one scope.
#[derive(Debug, Default)]
struct Region {
    server_groups: BTreeMap<String, RemoteServerGroup>,
    instances: BTreeMap<String, RemoteInstance>,
    load_balancers: BTreeMap<String, RemoteLoadBalancer>,
    security_groups: BTreeMap<String, RemoteSecurityGroup>,
    networks: BTreeMap<String, RemoteNetwork>,
    subnets: BTreeMap<String, RemoteSubnet>,
    images: BTreeMap<String, RemoteImage>,
    key_pairs: BTreeMap<String, RemoteKeyPair>,
    instance_types: Vec<RemoteInstanceType>,
}

#[derive(Debug)]
struct Task {
    polls_left: u32,
    outcome: TaskStatus,
}

#[derive(Debug, Default)]
struct State {
    regions: HashMap<Scope, Region>,
    fail_lists: bool,
    failing: HashMap<&'static str, String>,
    rejecting: HashMap<&'static str, String>,
    task_latency: u32,
    stalled: bool,
    tasks: HashMap<String, Task>,
    next_id: u64,
    submitted: Vec<Mutation>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// A fake cloud holding every resource in memory.
#[derive(Debug, Default)]
pub struct InMemoryCloud {
    state: Mutex<State>,
}

macro_rules! seed {
    ($(#[$doc:meta] $add:ident, $remove:ident, $field:ident, $ty:ty, $key:ident;)*) => {
        $(
            #[$doc]
            pub fn $add(&self, scope: &Scope, resource: $ty) {
                let mut state = self.lock();
                let region = state.regions.entry(scope.clone()).or_default();
                region.$field.insert(resource.$key.clone(), resource);
            }

            #[doc = concat!("Remove a resource added with `", stringify!($add), "`.")]
            pub fn $remove(&self, scope: &Scope, key: &str) -> bool {
                let mut state = self.lock();
                state
                    .regions
                    .get_mut(scope)
                    .is_some_and(|region| region.$field.remove(key).is_some())
            }
        )*
    };
}

impl InMemoryCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("cloud state lock poisoned")
    }

    seed! {
        /// Add or replace a server group, keyed by name.
        add_server_group, remove_server_group, server_groups, RemoteServerGroup, name;
        /// Add or replace an instance, keyed by id.
        add_instance, remove_instance, instances, RemoteInstance, id;
        /// Add or replace a load balancer, keyed by id.
        add_load_balancer, remove_load_balancer, load_balancers, RemoteLoadBalancer, id;
        /// Add or replace a security group, keyed by id.
        add_security_group, remove_security_group, security_groups, RemoteSecurityGroup, id;
        /// Add or replace a network, keyed by id.
        add_network, remove_network, networks, RemoteNetwork, id;
        /// Add or replace a subnet, keyed by id.
        add_subnet, remove_subnet, subnets, RemoteSubnet, id;
        /// Add or replace an image, keyed by id.
        add_image, remove_image, images, RemoteImage, id;
        /// Add or replace a key pair, keyed by id.
        add_key_pair, remove_key_pair, key_pairs, RemoteKeyPair, id;
    }

    /// Add one (instance type, zone) offering.
    pub fn add_instance_type(&self, scope: &Scope, offering: RemoteInstanceType) {
        self.lock()
            .regions
            .entry(scope.clone())
            .or_default()
            .instance_types
            .push(offering);
    }

    /// The current state of a load balancer.
    pub fn load_balancer(&self, scope: &Scope, id: &str) -> Option<RemoteLoadBalancer> {
        self.lock()
            .regions
            .get(scope)
            .and_then(|region| region.load_balancers.get(id).cloned())
    }

    /// Make every list call fail with a transient error.
    pub fn fail_lists(&self, fail: bool) {
        self.lock().fail_lists = fail;
    }

    /// Tasks for the named mutation (see [`Mutation::name`]) report failure
    /// and leave the resources unchanged.
    pub fn fail_mutation(&self, name: &'static str, message: impl Into<String>) {
        self.lock().failing.insert(name, message.into());
    }

    /// Submitting the named mutation fails outright.
    pub fn reject_mutation(&self, name: &'static str, message: impl Into<String>) {
        self.lock().rejecting.insert(name, message.into());
    }

    /// Number of polls a task reports `Pending` before finishing.
    pub fn task_latency(&self, polls: u32) {
        self.lock().task_latency = polls;
    }

    /// Keep every task pending forever. The mutations still take effect.
    pub fn stall_tasks(&self, stall: bool) {
        self.lock().stalled = stall;
    }

    /// Every mutation submitted so far, in order.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().submitted.clone()
    }

    /// Names of the mutations submitted so far.
    pub fn mutation_names(&self) -> Vec<&'static str> {
        self.lock().submitted.iter().map(Mutation::name).collect()
    }

    /// Forget recorded mutations.
    pub fn clear_mutations(&self) {
        self.lock().submitted.clear();
    }

    fn list<T, F>(&self, operation: &str, scope: &Scope, filter: &ListFilter, select: F) -> SyncResult<Vec<T>>
    where
        T: Clone,
        F: Fn(&Region) -> Vec<(&str, &str, &T)>,
    {
        let state = self.lock();
        if state.fail_lists {
            return Err(SyncError::transient(operation, "request limit exceeded"));
        }
        Ok(state
            .regions
            .get(scope)
            .map(|region| {
                select(region)
                    .into_iter()
                    .filter(|(id, name, _)| filter.matches(id, name))
                    .map(|(_, _, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl RemoteLister for InMemoryCloud {
    async fn list_server_groups(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteServerGroup>> {
        self.list("list_server_groups", scope, filter, |r| {
            r.server_groups.values().map(|g| (g.id.as_str(), g.name.as_str(), g)).collect()
        })
    }

    async fn list_instances(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteInstance>> {
        self.list("list_instances", scope, filter, |r| {
            r.instances.values().map(|i| (i.id.as_str(), i.name.as_str(), i)).collect()
        })
    }

    async fn list_load_balancers(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteLoadBalancer>> {
        self.list("list_load_balancers", scope, filter, |r| {
            r.load_balancers.values().map(|l| (l.id.as_str(), l.name.as_str(), l)).collect()
        })
    }

    async fn list_security_groups(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteSecurityGroup>> {
        self.list("list_security_groups", scope, filter, |r| {
            r.security_groups.values().map(|s| (s.id.as_str(), s.name.as_str(), s)).collect()
        })
    }

    async fn list_networks(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteNetwork>> {
        self.list("list_networks", scope, filter, |r| {
            r.networks.values().map(|n| (n.id.as_str(), n.name.as_str(), n)).collect()
        })
    }

    async fn list_subnets(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteSubnet>> {
        self.list("list_subnets", scope, filter, |r| {
            r.subnets.values().map(|s| (s.id.as_str(), s.name.as_str(), s)).collect()
        })
    }

    async fn list_images(&self, scope: &Scope, filter: &ListFilter) -> SyncResult<Vec<RemoteImage>> {
        self.list("list_images", scope, filter, |r| {
            r.images.values().map(|i| (i.id.as_str(), i.name.as_str(), i)).collect()
        })
    }

    async fn list_key_pairs(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteKeyPair>> {
        self.list("list_key_pairs", scope, filter, |r| {
            r.key_pairs.values().map(|k| (k.id.as_str(), k.name.as_str(), k)).collect()
        })
    }

    async fn list_instance_types(
        &self,
        scope: &Scope,
        filter: &ListFilter,
    ) -> SyncResult<Vec<RemoteInstanceType>> {
        self.list("list_instance_types", scope, filter, |r| {
            r.instance_types.iter().map(|t| (t.name.as_str(), t.name.as_str(), t)).collect()
        })
    }
}

#[async_trait]
impl RemoteMutator for InMemoryCloud {
    async fn submit(&self, scope: &Scope, mutation: Mutation) -> SyncResult<Submission> {
        let mut state = self.lock();
        let name = mutation.name();
        state.submitted.push(mutation.clone());

        if let Some(message) = state.rejecting.get(name) {
            return Err(SyncError::transient(name, message.clone()));
        }

        let failure = state.failing.get(name).cloned();
        let (resource_ids, outcome) = match failure {
            Some(message) => (Vec::new(), TaskStatus::Failed(message)),
            None => (apply(&mut state, scope, mutation)?, TaskStatus::Succeeded),
        };

        let task_id = state.next_id("task");
        let polls_left = state.task_latency;
        state.tasks.insert(
            task_id.clone(),
            Task {
                polls_left,
                outcome,
            },
        );
        debug!(task = %task_id, mutation = name, %scope, "accepted mutation");

        Ok(Submission {
            task: TaskHandle::new(task_id),
            resource_ids,
        })
    }

    async fn poll_status(&self, _scope: &Scope, task: &TaskHandle) -> SyncResult<TaskStatus> {
        let mut state = self.lock();
        let stalled = state.stalled;
        let Some(entry) = state.tasks.get_mut(task.as_str()) else {
            return Err(SyncError::remote("poll_status", format!("unknown task {task}")));
        };
        if stalled {
            return Ok(TaskStatus::Pending);
        }
        if entry.polls_left > 0 {
            entry.polls_left -= 1;
            return Ok(TaskStatus::Pending);
        }
        Ok(entry.outcome.clone())
    }
}

fn not_found(operation: &str, what: &str, id: &str) -> SyncError {
    SyncError::remote(operation, format!("{what} {id} not found"))
}

fn load_balancer<'a>(
    state: &'a mut State,
    scope: &Scope,
    operation: &str,
    id: &str,
) -> SyncResult<&'a mut RemoteLoadBalancer> {
    state
        .regions
        .get_mut(scope)
        .and_then(|region| region.load_balancers.get_mut(id))
        .ok_or_else(|| not_found(operation, "load balancer", id))
}

fn apply(state: &mut State, scope: &Scope, mutation: Mutation) -> SyncResult<Vec<String>> {
    let operation = mutation.name();

    match mutation {
        Mutation::CreateLoadBalancer {
            name,
            kind,
            network_id,
            subnet_id,
            security_group_ids,
        } => {
            let id = state.next_id("lb");
            state.regions.entry(scope.clone()).or_default().load_balancers.insert(
                id.clone(),
                RemoteLoadBalancer {
                    id: id.clone(),
                    name,
                    kind,
                    network_id,
                    subnet_id,
                    security_group_ids,
                    ..RemoteLoadBalancer::default()
                },
            );
            Ok(vec![id])
        }
        Mutation::CreateListener {
            load_balancer_id,
            name,
            protocol,
            port,
            health_check,
            certificate,
        } => {
            let listener_id = state.next_id("lbl");
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            if lb
                .listeners
                .iter()
                .any(|l| l.port == port && l.protocol.eq_ignore_ascii_case(&protocol))
            {
                return Err(SyncError::remote(
                    operation,
                    format!("{protocol}:{port} already has a listener"),
                ));
            }
            lb.listeners.push(RemoteListener {
                listener_id: listener_id.clone(),
                name,
                protocol: protocol.to_ascii_uppercase(),
                port,
                health_check,
                certificate,
                targets: Vec::new(),
                rules: Vec::new(),
            });
            Ok(vec![listener_id])
        }
        Mutation::ModifyListener {
            load_balancer_id,
            listener_id,
            health_check,
        } => {
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            listener(lb, operation, &listener_id)?.health_check = Some(health_check);
            Ok(Vec::new())
        }
        Mutation::DeleteListener {
            load_balancer_id,
            listener_id,
        } => {
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            let before = lb.listeners.len();
            lb.listeners.retain(|l| l.listener_id != listener_id);
            if lb.listeners.len() == before {
                return Err(not_found(operation, "listener", &listener_id));
            }
            Ok(Vec::new())
        }
        Mutation::CreateRule {
            load_balancer_id,
            listener_id,
            domain,
            url,
            health_check,
        } => {
            let location_id = state.next_id("loc");
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            let listener = listener(lb, operation, &listener_id)?;
            if !is_layer7(listener) {
                return Err(SyncError::remote(
                    operation,
                    format!("listener {listener_id} does not accept rules"),
                ));
            }
            if listener.rules.iter().any(|r| r.domain == domain && r.url == url) {
                return Err(SyncError::remote(
                    operation,
                    format!("a rule for {domain}{url} already exists"),
                ));
            }
            listener.rules.push(RemoteRule {
                location_id: location_id.clone(),
                domain,
                url,
                health_check,
                targets: Vec::new(),
            });
            Ok(vec![location_id])
        }
        Mutation::ModifyRule {
            load_balancer_id,
            listener_id,
            location_id,
            health_check,
        } => {
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            let listener = listener(lb, operation, &listener_id)?;
            rule(listener, operation, &location_id)?.health_check = Some(health_check);
            Ok(Vec::new())
        }
        Mutation::DeleteRule {
            load_balancer_id,
            listener_id,
            location_id,
        } => {
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            let listener = listener(lb, operation, &listener_id)?;
            let before = listener.rules.len();
            listener.rules.retain(|r| r.location_id != location_id);
            if listener.rules.len() == before {
                return Err(not_found(operation, "rule", &location_id));
            }
            Ok(Vec::new())
        }
        Mutation::RegisterTargets {
            load_balancer_id,
            listener_id,
            location_id,
            targets,
        } => {
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            let listener = listener(lb, operation, &listener_id)?;
            let registered = match &location_id {
                Some(location_id) => &mut rule(listener, operation, location_id)?.targets,
                None => &mut listener.targets,
            };
            for target in targets {
                if registered.iter().any(|t| same_backend(t, &target)) {
                    return Err(SyncError::remote(
                        operation,
                        format!("{}:{} is already registered", target.instance_id, target.port),
                    ));
                }
                registered.push(target);
            }
            Ok(Vec::new())
        }
        Mutation::DeregisterTargets {
            load_balancer_id,
            listener_id,
            location_id,
            targets,
        } => {
            let lb = load_balancer(state, scope, operation, &load_balancer_id)?;
            let listener = listener(lb, operation, &listener_id)?;
            let registered = match &location_id {
                Some(location_id) => &mut rule(listener, operation, location_id)?.targets,
                None => &mut listener.targets,
            };
            registered.retain(|t| !targets.iter().any(|gone| same_backend(t, gone)));
            Ok(Vec::new())
        }
    }
}

fn listener<'a>(
    lb: &'a mut RemoteLoadBalancer,
    operation: &str,
    listener_id: &str,
) -> SyncResult<&'a mut RemoteListener> {
    lb.listeners
        .iter_mut()
        .find(|l| l.listener_id == listener_id)
        .ok_or_else(|| not_found(operation, "listener", listener_id))
}

fn rule<'a>(
    listener: &'a mut RemoteListener,
    operation: &str,
    location_id: &str,
) -> SyncResult<&'a mut RemoteRule> {
    listener
        .rules
        .iter_mut()
        .find(|r| r.location_id == location_id)
        .ok_or_else(|| not_found(operation, "rule", location_id))
}

fn is_layer7(listener: &RemoteListener) -> bool {
    listener
        .protocol
        .parse::<cloudsync_core::ListenerProtocol>()
        .is_ok_and(|p| p.is_layer7())
}

fn same_backend(a: &Target, b: &Target) -> bool {
    a.instance_id == b.instance_id && a.port == b.port
}
