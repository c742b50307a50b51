//! Load balancers with their listeners, rules and targets.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::LoadBalancerAttributes;
use cloudsync_core::remote::RemoteLoadBalancer;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, Listener, ListFilter, Namespace, RemoteLister, Scope,
    SyncResult, TargetKind,
};
use tracing::{debug, warn};

use super::{application_of, identity};
use crate::agent::{AgentDataType, CachingAgent};
use crate::on_demand::{OnDemandAgent, OnDemandKind};

const AGENT: &str = "LoadBalancerLoader";

const DATA_TYPES: &[AgentDataType] = &[
    AgentDataType::authoritative(Namespace::LoadBalancers),
    AgentDataType::informative(Namespace::Applications),
    AgentDataType::informative(Namespace::Instances),
];

/// Loads load balancers and links them to applications and instances.
#[derive(Debug, Clone)]
pub struct LoadBalancerLoader {
    scope: Scope,
}

impl LoadBalancerLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    fn build(&self, load_balancers: Vec<RemoteLoadBalancer>) -> CacheResult {
        let Scope { account, region } = &self.scope;
        let mut result = CacheResult::new();
        result.declare(Namespace::LoadBalancers);

        for lb in load_balancers {
            let Some(key) = identity(AGENT, &lb.name, keys::load_balancer(account, region, &lb.id))
            else {
                continue;
            };

            let mut listeners = Vec::with_capacity(lb.listeners.len());
            for remote in lb.listeners {
                let listener_id = remote.listener_id.clone();
                match Listener::from_remote(remote) {
                    Ok(listener) => listeners.push(listener),
                    Err(error) => {
                        warn!(agent = AGENT, load_balancer = %lb.id, listener = %listener_id, %error, "skipping listener");
                    }
                }
            }

            let application = application_of(&lb.name);
            let mut entity = EntitySnapshot::new(key.clone(), Attributes::empty());

            if let Some(app_key) = application
                .as_deref()
                .and_then(|app| identity(AGENT, &lb.name, keys::application(app)))
            {
                entity.add_relationship(Namespace::Applications, app_key.clone());
                result.merge(
                    Namespace::Applications,
                    EntitySnapshot::placeholder(app_key).with_relationship(Namespace::LoadBalancers, key.clone()),
                );
            }

            for target in listeners.iter().flat_map(|l| l.all_targets()) {
                if target.kind != TargetKind::Instance {
                    continue;
                }
                if let Some(instance_key) =
                    identity(AGENT, &target.instance_id, keys::instance(account, region, &target.instance_id))
                {
                    entity.add_relationship(Namespace::Instances, instance_key.clone());
                    result.merge(
                        Namespace::Instances,
                        EntitySnapshot::placeholder(instance_key)
                            .with_relationship(Namespace::LoadBalancers, key.clone()),
                    );
                }
            }
            entity.add_relationships(
                Namespace::SecurityGroups,
                lb.security_group_ids
                    .iter()
                    .filter_map(|id| identity(AGENT, id, keys::security_group(account, region, id))),
            );
            if let Some(network) = lb
                .network_id
                .as_deref()
                .and_then(|id| identity(AGENT, id, keys::network(account, region, id)))
            {
                entity.add_relationship(Namespace::Networks, network);
            }

            entity.merge_from(EntitySnapshot::new(
                key,
                Attributes::LoadBalancer(LoadBalancerAttributes {
                    account: account.clone(),
                    region: region.clone(),
                    id: lb.id,
                    name: lb.name,
                    application,
                    kind: lb.kind,
                    network_id: lb.network_id,
                    subnet_id: lb.subnet_id,
                    vips: lb.vips,
                    security_group_ids: lb.security_group_ids,
                    listeners,
                    created_at: lb.created_at,
                }),
            ));
            result.insert(Namespace::LoadBalancers, entity);
        }

        result
    }
}

#[async_trait]
impl CachingAgent for LoadBalancerLoader {
    fn agent_type(&self) -> &'static str {
        AGENT
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn provided_data_types(&self) -> &'static [AgentDataType] {
        DATA_TYPES
    }

    async fn load_data(&self, lister: &dyn RemoteLister) -> SyncResult<CacheResult> {
        let load_balancers = lister
            .list_load_balancers(&self.scope, &ListFilter::all())
            .await?;
        debug!(agent = AGENT, scope = %self.scope, count = load_balancers.len(), "listed load balancers");
        Ok(self.build(load_balancers))
    }
}

#[async_trait]
impl OnDemandAgent for LoadBalancerLoader {
    fn on_demand_kind(&self) -> OnDemandKind {
        OnDemandKind::LoadBalancer
    }

    async fn load_one(
        &self,
        lister: &dyn RemoteLister,
        resource: &str,
    ) -> SyncResult<(String, CacheResult)> {
        let key = keys::load_balancer(&self.scope.account, &self.scope.region, resource)?;
        let load_balancers = lister
            .list_load_balancers(&self.scope, &ListFilter::by_id(resource))
            .await?;
        let load_balancers = load_balancers
            .into_iter()
            .filter(|lb| lb.id == resource)
            .collect();
        Ok((key, self.build(load_balancers)))
    }
}
