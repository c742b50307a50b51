//! The per-scope synchronization pipeline.
//!
//! One pipeline owns every loader for one (account, region) and the
//! [`ProviderCache`] they publish into. A cycle runs the loaders one after
//! another; for each loader it:
//!
//! 1. Stamps the scan start and calls `load_data`
//! 2. Reconciles the fresh result against the loader's on-demand entries
//! 3. Installs authoritative namespaces and replaces informative edges
//! 4. Writes the keep / evict decisions back to the on-demand store
//!
//! A failed load leaves the previous data in place. Pipelines share no
//! mutable state, so several can run side by side.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use cloudsync_cache::{
    reconcile, Cache, CacheResult, EdgeSet, PendingOnDemand, ProviderCache, Reconciliation,
};
use cloudsync_core::{
    keys, Clock, RemoteLister, Scope, SyncError, SyncResult, SystemClock, Timestamp,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::{Authority, CachingAgent};
use crate::loaders::{
    ImageLoader, InstanceLoader, InstanceTypeLoader, KeyPairLoader, LoadBalancerLoader,
    NetworkLoader, SecurityGroupLoader, ServerGroupLoader, SubnetLoader,
};
use crate::metrics::AgentMetrics;
use crate::on_demand::{OnDemandAgent, OnDemandKind, OnDemandRequest, OnDemandResult};

/// What happened to one agent during a cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentOutcome {
    /// The load succeeded and was installed.
    #[serde(rename_all = "camelCase")]
    Loaded {
        /// Entities installed into authoritative namespaces.
        entities: usize,
        /// On-demand entries merged and kept.
        kept: usize,
        /// On-demand entries evicted.
        evicted: usize,
        /// Entities dropped because an on-demand refresh found them gone.
        removed: usize,
    },
    /// The load failed; the previous data stays.
    Failed(String),
}

/// Outcome for one agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentReport {
    /// Agent type.
    pub agent: String,
    /// Outcome.
    pub outcome: AgentOutcome,
}

/// Outcome of one pipeline cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// The pipeline's scope.
    pub scope: Scope,
    /// One entry per agent, in run order.
    pub agents: Vec<AgentReport>,
}

impl CycleReport {
    /// Number of agents whose load failed.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.agents
            .iter()
            .filter(|r| matches!(r.outcome, AgentOutcome::Failed(_)))
            .count()
    }

    /// Outcome for the agent named `agent`.
    #[must_use]
    pub fn outcome(&self, agent: &str) -> Option<&AgentOutcome> {
        self.agents
            .iter()
            .find(|r| r.agent == agent)
            .map(|r| &r.outcome)
    }
}

/// Loaders, cache and remote handle for one (account, region).
pub struct Pipeline {
    scope: Scope,
    cache: Arc<ProviderCache>,
    lister: Arc<dyn RemoteLister>,
    clock: Arc<dyn Clock>,
    agents: Vec<Arc<dyn CachingAgent>>,
    on_demand_agents: Vec<Arc<dyn OnDemandAgent>>,
    metrics: AgentMetrics,
    on_demand_enabled: bool,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("scope", &self.scope)
            .field("agents", &self.agent_types())
            .field("on_demand_enabled", &self.on_demand_enabled)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// A pipeline running every standard loader for `scope`.
    pub fn new(scope: Scope, cache: Arc<ProviderCache>, lister: Arc<dyn RemoteLister>) -> Self {
        Self::empty(scope.clone(), cache, lister)
            .add_on_demand_agent(ServerGroupLoader::new(scope.clone()))
            .add_agent(InstanceLoader::new(scope.clone()))
            .add_on_demand_agent(LoadBalancerLoader::new(scope.clone()))
            .add_on_demand_agent(SecurityGroupLoader::new(scope.clone()))
            .add_agent(NetworkLoader::new(scope.clone()))
            .add_agent(SubnetLoader::new(scope.clone()))
            .add_agent(ImageLoader::new(scope.clone()))
            .add_agent(KeyPairLoader::new(scope.clone()))
            .add_agent(InstanceTypeLoader::new(scope))
    }

    /// A pipeline with no loaders.
    pub fn empty(scope: Scope, cache: Arc<ProviderCache>, lister: Arc<dyn RemoteLister>) -> Self {
        Self {
            scope,
            cache,
            lister,
            clock: Arc::new(SystemClock),
            agents: Vec::new(),
            on_demand_agents: Vec::new(),
            metrics: AgentMetrics::default(),
            on_demand_enabled: true,
        }
    }

    /// Add a full-scan loader.
    #[must_use]
    pub fn add_agent<A: CachingAgent + 'static>(mut self, agent: A) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    /// Add a loader that also serves on-demand refreshes.
    #[must_use]
    pub fn add_on_demand_agent<A: OnDemandAgent + 'static>(mut self, agent: A) -> Self {
        let agent = Arc::new(agent);
        self.agents.push(agent.clone());
        self.on_demand_agents.push(agent);
        self
    }

    /// Use `clock` for scan starts and capture times.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report through a shared metrics handle.
    #[must_use]
    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Enable or disable on-demand refreshes.
    #[must_use]
    pub fn on_demand_enabled(mut self, enabled: bool) -> Self {
        self.on_demand_enabled = enabled;
        self
    }

    /// The pipeline's scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The cache this pipeline publishes into.
    #[must_use]
    pub fn cache(&self) -> &Arc<ProviderCache> {
        &self.cache
    }

    /// Names of the loaders, in run order.
    #[must_use]
    pub fn agent_types(&self) -> Vec<&'static str> {
        self.agents.iter().map(|a| a.agent_type()).collect()
    }

    /// Run every loader once.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport {
            scope: self.scope.clone(),
            agents: Vec::with_capacity(self.agents.len()),
        };

        for agent in &self.agents {
            let outcome = self.run_agent(agent.as_ref()).await;
            report.agents.push(AgentReport {
                agent: agent.agent_type().to_string(),
                outcome,
            });
        }

        info!(
            scope = %self.scope,
            agents = report.agents.len(),
            failures = report.failures(),
            "cycle finished"
        );
        report
    }

    async fn run_agent(&self, agent: &dyn CachingAgent) -> AgentOutcome {
        let name = agent.agent_name();
        let started = Instant::now();
        let scan_start = self.clock.now();

        let fresh = match agent.load_data(self.lister.as_ref()).await {
            Ok(fresh) => fresh,
            Err(error) => {
                warn!(
                    agent = %name,
                    %error,
                    transient = error.is_transient(),
                    "load failed, keeping previous data"
                );
                self.metrics.cycle_failed(&name);
                return AgentOutcome::Failed(error.to_string());
            }
        };

        let pending = self
            .cache
            .on_demand()
            .entries_for(&agent.authoritative_namespaces());
        let Reconciliation {
            mut result,
            kept,
            evicted,
            removed,
        } = reconcile(scan_start, fresh, pending);

        let entities = self.publish(agent, &mut result, scan_start);

        let store = self.cache.on_demand();
        let processed_at = self.clock.now();
        for entry in &kept {
            if store.mark_processed(&entry.key, entry.generation, processed_at) {
                self.cache.stats().record_on_demand_kept();
            } else {
                debug!(agent = %name, key = %entry.key, "on-demand entry replaced during cycle");
            }
        }
        for entry in &evicted {
            if store.evict_if(&entry.key, entry.generation) {
                self.cache.stats().record_on_demand_evicted();
                debug!(agent = %name, key = %entry.key, reason = %entry.reason, "evicted on-demand entry");
            }
        }
        if !kept.is_empty() || !evicted.is_empty() {
            self.metrics
                .on_demand_reconciled(&name, kept.len(), evicted.len());
        }

        self.metrics.cycle_completed(&name, started.elapsed());
        debug!(
            agent = %name,
            entities,
            kept = kept.len(),
            evicted = evicted.len(),
            removed = removed.len(),
            "agent cycle complete"
        );

        AgentOutcome::Loaded {
            entities,
            kept: kept.len(),
            evicted: evicted.len(),
            removed: removed.len(),
        }
    }

    /// Install what `agent` provides from `result`; returns entities installed.
    fn publish(
        &self,
        agent: &dyn CachingAgent,
        result: &mut CacheResult,
        scan_start: Timestamp,
    ) -> usize {
        let mut installed = 0;
        for data_type in agent.provided_data_types() {
            let namespace = data_type.namespace;
            let entities = result.take_namespace(namespace).unwrap_or_default();
            match data_type.authority {
                Authority::Authoritative => {
                    installed += entities.len();
                    self.metrics
                        .entities_loaded(namespace.as_str(), entities.len());
                    self.cache.install_at(namespace, entities, Some(scan_start));
                }
                Authority::Informative => {
                    let edges: EdgeSet = entities
                        .into_iter()
                        .filter(|(_, entity)| !entity.relationships().is_empty())
                        .map(|(key, entity)| (key, entity.relationships().clone()))
                        .collect();
                    self.cache.contribute(namespace, agent.agent_type(), edges);
                }
            }
        }

        for namespace in result.namespaces() {
            debug!(agent = agent.agent_type(), %namespace, "ignoring undeclared namespace in result");
        }
        installed
    }

    /// Refresh one resource after a mutation.
    ///
    /// Returns `Ok(None)` when on-demand is disabled or no agent in this
    /// pipeline serves the request.
    pub async fn handle_on_demand(
        &self,
        request: &OnDemandRequest,
    ) -> SyncResult<Option<OnDemandResult>> {
        if !self.on_demand_enabled {
            debug!(scope = %self.scope, kind = %request.kind, "on-demand disabled");
            return Ok(None);
        }

        let scope = request.scope();
        let Some(agent) = self
            .on_demand_agents
            .iter()
            .find(|a| a.handles(request.kind, &scope))
        else {
            return Ok(None);
        };

        let stored = agent
            .handle_on_demand(request, self.lister.as_ref(), &self.cache, self.clock.as_ref())
            .await?;
        if let Some(stored) = &stored {
            self.metrics.on_demand_stored(stored.namespace.as_str());
        }
        Ok(stored)
    }

    /// Refresh the resource a cache key points at.
    pub async fn handle_on_demand_key(&self, key: &str) -> SyncResult<Option<OnDemandResult>> {
        let parsed = keys::parse(key)?;
        let kind = OnDemandKind::from_namespace(parsed.namespace()).ok_or_else(|| {
            SyncError::UnknownOperation(format!("on-demand refresh of {}", parsed.namespace()))
        })?;
        let (Some(account), Some(region)) = (parsed.account(), parsed.region()) else {
            return Err(SyncError::InvalidKey {
                key: key.to_string(),
                reason: "key carries no account and region".to_string(),
            });
        };

        let request = OnDemandRequest::new(kind, account, region, parsed.name());
        self.handle_on_demand(&request).await
    }

    /// Every outstanding on-demand entry, oldest capture first.
    #[must_use]
    pub fn pending_on_demand_requests(&self) -> Vec<PendingOnDemand> {
        self.cache.on_demand().pending(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_core::remote::{RemoteLoadBalancer, RemoteSecurityGroup, RemoteServerGroup};
    use cloudsync_core::{ManualClock, Namespace};
    use cloudsync_testing::InMemoryCloud;

    const SG_KEY: &str = "sg:account1:region1:sg-123";

    fn scope() -> Scope {
        Scope::new("account1", "region1")
    }

    fn sg(id: &str) -> RemoteSecurityGroup {
        RemoteSecurityGroup {
            id: id.to_string(),
            name: format!("web-{id}"),
            ..RemoteSecurityGroup::default()
        }
    }

    fn setup() -> (Arc<InMemoryCloud>, Arc<ManualClock>, Pipeline) {
        let cloud = Arc::new(InMemoryCloud::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let pipeline = Pipeline::empty(scope(), Arc::new(ProviderCache::new()), cloud.clone())
            .add_on_demand_agent(SecurityGroupLoader::new(scope()))
            .with_clock(clock.clone());
        (cloud, clock, pipeline)
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_data() {
        let (cloud, _clock, pipeline) = setup();
        cloud.add_security_group(&scope(), sg("sg-123"));

        let report = pipeline.run_cycle().await;
        assert_eq!(report.failures(), 0);
        assert!(pipeline.cache().contains(Namespace::SecurityGroups, SG_KEY));

        cloud.fail_lists(true);
        let report = pipeline.run_cycle().await;
        assert_eq!(report.failures(), 1);
        assert!(matches!(
            report.outcome("SecurityGroupLoader"),
            Some(AgentOutcome::Failed(_))
        ));
        assert!(pipeline.cache().contains(Namespace::SecurityGroups, SG_KEY));
    }

    #[tokio::test]
    async fn on_demand_survives_one_cycle_then_is_evicted() {
        let (cloud, clock, pipeline) = setup();
        cloud.add_security_group(&scope(), sg("sg-123"));

        clock.set(Timestamp::from_millis(100));
        pipeline.handle_on_demand_key(SG_KEY).await.unwrap().unwrap();
        // The list endpoint has not caught up with the new group yet.
        cloud.remove_security_group(&scope(), "sg-123");

        clock.set(Timestamp::from_millis(90));
        let report = pipeline.run_cycle().await;
        assert_eq!(
            report.outcome("SecurityGroupLoader"),
            Some(&AgentOutcome::Loaded {
                entities: 1,
                kept: 1,
                evicted: 0,
                removed: 0
            })
        );
        assert!(pipeline.cache().contains(Namespace::SecurityGroups, SG_KEY));
        assert_eq!(pipeline.cache().on_demand().get(SG_KEY).unwrap().processed_count, 1);

        clock.set(Timestamp::from_millis(150));
        let report = pipeline.run_cycle().await;
        assert_eq!(
            report.outcome("SecurityGroupLoader"),
            Some(&AgentOutcome::Loaded {
                entities: 0,
                kept: 0,
                evicted: 1,
                removed: 0
            })
        );
        assert!(pipeline.cache().on_demand().is_empty());
        assert!(!pipeline.cache().contains(Namespace::SecurityGroups, SG_KEY));
        assert_eq!(pipeline.cache().stats().on_demand_evicted(), 1);
    }

    #[tokio::test]
    async fn on_demand_for_deleted_resource_removes_it() {
        let (cloud, clock, pipeline) = setup();
        cloud.add_security_group(&scope(), sg("sg-123"));
        pipeline.run_cycle().await;

        cloud.remove_security_group(&scope(), "sg-123");
        clock.set(Timestamp::from_millis(100));
        pipeline.handle_on_demand_key(SG_KEY).await.unwrap().unwrap();
        // A lagging list still returns the deleted group.
        cloud.add_security_group(&scope(), sg("sg-123"));

        clock.set(Timestamp::from_millis(90));
        let report = pipeline.run_cycle().await;

        assert!(matches!(
            report.outcome("SecurityGroupLoader"),
            Some(AgentOutcome::Loaded { removed: 1, .. })
        ));
        assert!(!pipeline.cache().contains(Namespace::SecurityGroups, SG_KEY));
    }

    #[tokio::test]
    async fn refresh_replacing_entry_mid_cycle_is_not_evicted() {
        let (cloud, clock, pipeline) = setup();
        cloud.add_security_group(&scope(), sg("sg-123"));

        clock.set(Timestamp::from_millis(10));
        let first = pipeline.handle_on_demand_key(SG_KEY).await.unwrap().unwrap();
        clock.set(Timestamp::from_millis(20));
        pipeline.run_cycle().await;

        // A newer refresh lands; the old write's eviction must not remove it.
        clock.set(Timestamp::from_millis(200));
        let second = pipeline.handle_on_demand_key(SG_KEY).await.unwrap().unwrap();
        assert!(!pipeline.cache().on_demand().evict_if(SG_KEY, first.generation));
        assert_eq!(
            pipeline.cache().on_demand().get(SG_KEY).unwrap().generation,
            second.generation
        );
    }

    #[tokio::test]
    async fn disabled_on_demand_stores_nothing() {
        let (cloud, _clock, pipeline) = setup();
        cloud.add_security_group(&scope(), sg("sg-123"));
        let pipeline = pipeline.on_demand_enabled(false);

        assert!(pipeline.handle_on_demand_key(SG_KEY).await.unwrap().is_none());
        assert!(pipeline.pending_on_demand_requests().is_empty());
    }

    #[tokio::test]
    async fn key_without_on_demand_support_is_rejected() {
        let (_cloud, _clock, pipeline) = setup();

        let err = pipeline
            .handle_on_demand_key("img:account1:region1:img-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownOperation(_)));

        let err = pipeline.handle_on_demand_key("nonsense").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn pending_requests_report_age() {
        let (cloud, clock, pipeline) = setup();
        cloud.add_security_group(&scope(), sg("sg-123"));

        clock.set(Timestamp::from_millis(1_000));
        pipeline.handle_on_demand_key(SG_KEY).await.unwrap();
        clock.set(Timestamp::from_millis(4_000));

        let pending = pipeline.pending_on_demand_requests();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].age.as_secs(), 3);
    }

    #[tokio::test]
    async fn informative_edges_reach_owner_entities() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_server_group(
            &scope(),
            RemoteServerGroup {
                id: "asg-1".to_string(),
                name: "web-prod-v001".to_string(),
                ..RemoteServerGroup::default()
            },
        );
        cloud.add_load_balancer(
            &scope(),
            RemoteLoadBalancer {
                id: "lb-1".to_string(),
                name: "web-frontend".to_string(),
                kind: "OPEN".to_string(),
                ..RemoteLoadBalancer::default()
            },
        );
        let pipeline = Pipeline::new(scope(), Arc::new(ProviderCache::new()), cloud);

        let report = pipeline.run_cycle().await;
        assert_eq!(report.failures(), 0);

        let app = pipeline.cache().get(Namespace::Applications, "app:web").unwrap();
        assert_eq!(
            app.related(Namespace::LoadBalancers).collect::<Vec<_>>(),
            vec!["lb:account1:region1:lb-1"]
        );
        assert_eq!(
            pipeline
                .cache()
                .related(Namespace::Applications, "app:web", Namespace::ServerGroups)
                .len(),
            1
        );
    }

    #[test]
    fn standard_pipeline_runs_every_loader() {
        let cloud = Arc::new(InMemoryCloud::new());
        let pipeline = Pipeline::new(scope(), Arc::new(ProviderCache::new()), cloud);
        assert_eq!(pipeline.agent_types().len(), 9);
        assert_eq!(pipeline.on_demand_agents.len(), 3);
    }
}
