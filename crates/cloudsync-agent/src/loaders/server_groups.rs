//! Server groups, and the applications and clusters derived from their names.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::{
    ApplicationAttributes, Capacity, ClusterAttributes, ServerGroupAttributes,
};
use cloudsync_core::remote::RemoteServerGroup;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Moniker, Namespace, RemoteLister, Scope,
    SyncResult,
};
use tracing::{debug, warn};

use super::identity;
use crate::agent::{AgentDataType, CachingAgent};
use crate::on_demand::{OnDemandAgent, OnDemandKind};

const AGENT: &str = "ServerGroupLoader";

const DATA_TYPES: &[AgentDataType] = &[
    AgentDataType::authoritative(Namespace::ServerGroups),
    AgentDataType::authoritative(Namespace::Applications),
    AgentDataType::authoritative(Namespace::Clusters),
    AgentDataType::informative(Namespace::Instances),
    AgentDataType::informative(Namespace::LoadBalancers),
];

/// Loads server groups and wires application → cluster → server group.
#[derive(Debug, Clone)]
pub struct ServerGroupLoader {
    scope: Scope,
}

impl ServerGroupLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    fn build(&self, groups: Vec<RemoteServerGroup>) -> CacheResult {
        let Scope { account, region } = &self.scope;
        let mut result = CacheResult::new();
        result
            .declare(Namespace::ServerGroups)
            .declare(Namespace::Applications)
            .declare(Namespace::Clusters);

        for group in groups {
            let Some(moniker) = Moniker::parse(&group.name) else {
                warn!(agent = AGENT, id = %group.id, "skipping server group without a usable name");
                continue;
            };
            let Some(group_key) =
                identity(AGENT, &group.id, keys::server_group(account, region, &group.name))
            else {
                continue;
            };
            let Some(app_key) = identity(AGENT, &group.name, keys::application(moniker.application()))
            else {
                continue;
            };
            let Some(cluster_key) = identity(
                AGENT,
                &group.name,
                keys::cluster(account, moniker.application(), moniker.cluster()),
            ) else {
                continue;
            };

            let instance_keys: Vec<String> = group
                .instance_ids
                .iter()
                .filter_map(|id| identity(AGENT, id, keys::instance(account, region, id)))
                .collect();
            let lb_keys: Vec<String> = group
                .load_balancer_ids
                .iter()
                .filter_map(|id| identity(AGENT, id, keys::load_balancer(account, region, id)))
                .collect();

            result.merge(
                Namespace::Applications,
                EntitySnapshot::new(
                    app_key.clone(),
                    Attributes::Application(ApplicationAttributes {
                        name: moniker.application().to_string(),
                    }),
                )
                .with_relationship(Namespace::Clusters, cluster_key.clone())
                .with_relationship(Namespace::ServerGroups, group_key.clone()),
            );

            let mut cluster = EntitySnapshot::new(
                cluster_key.clone(),
                Attributes::Cluster(ClusterAttributes {
                    account: account.clone(),
                    application: moniker.application().to_string(),
                    name: moniker.cluster().to_string(),
                }),
            )
            .with_relationship(Namespace::Applications, app_key.clone())
            .with_relationship(Namespace::ServerGroups, group_key.clone());
            cluster.add_relationships(Namespace::LoadBalancers, lb_keys.iter().cloned());
            result.merge(Namespace::Clusters, cluster);

            for key in &instance_keys {
                result.merge(
                    Namespace::Instances,
                    EntitySnapshot::placeholder(key.clone())
                        .with_relationship(Namespace::ServerGroups, group_key.clone()),
                );
            }
            for key in &lb_keys {
                result.merge(
                    Namespace::LoadBalancers,
                    EntitySnapshot::placeholder(key.clone())
                        .with_relationship(Namespace::ServerGroups, group_key.clone()),
                );
            }

            let mut entity = EntitySnapshot::new(
                group_key,
                Attributes::ServerGroup(ServerGroupAttributes {
                    account: account.clone(),
                    region: region.clone(),
                    id: group.id,
                    name: group.name,
                    application: moniker.application().to_string(),
                    cluster: moniker.cluster().to_string(),
                    status: group.status,
                    disabled: group.disabled,
                    capacity: Capacity {
                        min: group.min_size,
                        max: group.max_size,
                        desired: group.desired_size,
                    },
                    launch_configuration: group.launch_configuration.clone(),
                    network_id: group.network_id,
                    subnet_ids: group.subnet_ids,
                    zones: group.zones,
                    created_at: group.created_at,
                    tags: group.tags,
                }),
            )
            .with_relationship(Namespace::Applications, app_key)
            .with_relationship(Namespace::Clusters, cluster_key);
            entity.add_relationships(Namespace::Instances, instance_keys);
            entity.add_relationships(Namespace::LoadBalancers, lb_keys);
            if let Some(launch) = &group.launch_configuration {
                entity.add_relationships(
                    Namespace::SecurityGroups,
                    launch
                        .security_group_ids
                        .iter()
                        .filter_map(|id| identity(AGENT, id, keys::security_group(account, region, id))),
                );
                if let Some(image) = identity(AGENT, &launch.image_id, keys::image(account, region, &launch.image_id)) {
                    entity.add_relationship(Namespace::Images, image);
                }
            }
            result.insert(Namespace::ServerGroups, entity);
        }

        result
    }
}

#[async_trait]
impl CachingAgent for ServerGroupLoader {
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
        let groups = lister
            .list_server_groups(&self.scope, &ListFilter::all())
            .await?;
        debug!(agent = AGENT, scope = %self.scope, count = groups.len(), "listed server groups");
        Ok(self.build(groups))
    }
}

#[async_trait]
impl OnDemandAgent for ServerGroupLoader {
    fn on_demand_kind(&self) -> OnDemandKind {
        OnDemandKind::ServerGroup
    }

    async fn load_one(
        &self,
        lister: &dyn RemoteLister,
        resource: &str,
    ) -> SyncResult<(String, CacheResult)> {
        let key = keys::server_group(&self.scope.account, &self.scope.region, resource)?;
        let groups = lister
            .list_server_groups(&self.scope, &ListFilter::by_name(resource))
            .await?;
        let groups = groups.into_iter().filter(|g| g.name == resource).collect();
        Ok((key, self.build(groups)))
    }
}
