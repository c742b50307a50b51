//! Instances.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::InstanceAttributes;
use cloudsync_core::remote::RemoteInstance;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Namespace, RemoteLister, Scope, SyncResult,
};
use tracing::debug;

use super::identity;
use crate::agent::{AgentDataType, CachingAgent};

const AGENT: &str = "InstanceLoader";

const DATA_TYPES: &[AgentDataType] = &[
    AgentDataType::authoritative(Namespace::Instances),
    AgentDataType::informative(Namespace::ServerGroups),
];

/// Loads instances and links them to their server group.
#[derive(Debug, Clone)]
pub struct InstanceLoader {
    scope: Scope,
}

impl InstanceLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    fn build(&self, instances: Vec<RemoteInstance>) -> CacheResult {
        let Scope { account, region } = &self.scope;
        let mut result = CacheResult::new();
        result.declare(Namespace::Instances);

        for instance in instances {
            let Some(key) = identity(AGENT, &instance.id, keys::instance(account, region, &instance.id))
            else {
                continue;
            };

            let group_key = instance
                .server_group_name
                .as_deref()
                .filter(|name| !name.is_empty())
                .and_then(|name| identity(AGENT, &instance.id, keys::server_group(account, region, name)));

            let mut entity = EntitySnapshot::new(
                key.clone(),
                Attributes::Instance(InstanceAttributes {
                    account: account.clone(),
                    region: region.clone(),
                    id: instance.id.clone(),
                    name: instance.name,
                    state: instance.state,
                    zone: instance.zone,
                    image_id: instance.image_id.clone(),
                    instance_type: instance.instance_type.clone(),
                    private_ips: instance.private_ips,
                    public_ips: instance.public_ips,
                    network_id: instance.network_id.clone(),
                    subnet_id: instance.subnet_id.clone(),
                    server_group: instance.server_group_name,
                    launched_at: instance.launched_at,
                }),
            );

            if let Some(group_key) = group_key {
                entity.add_relationship(Namespace::ServerGroups, group_key.clone());
                result.merge(
                    Namespace::ServerGroups,
                    EntitySnapshot::placeholder(group_key).with_relationship(Namespace::Instances, key.clone()),
                );
            }
            entity.add_relationships(
                Namespace::SecurityGroups,
                instance
                    .security_group_ids
                    .iter()
                    .filter_map(|id| identity(AGENT, id, keys::security_group(account, region, id))),
            );
            let optional = [
                (Namespace::Images, instance.image_id.as_deref().map(|id| keys::image(account, region, id))),
                (
                    Namespace::InstanceTypes,
                    instance.instance_type.as_deref().map(|t| keys::instance_type(account, region, t)),
                ),
                (Namespace::Networks, instance.network_id.as_deref().map(|id| keys::network(account, region, id))),
                (Namespace::Subnets, instance.subnet_id.as_deref().map(|id| keys::subnet(account, region, id))),
            ];
            for (namespace, derived) in optional {
                if let Some(related) = derived.and_then(|k| identity(AGENT, &instance.id, k)) {
                    entity.add_relationship(namespace, related);
                }
            }

            result.insert(Namespace::Instances, entity);
        }

        result
    }
}

#[async_trait]
impl CachingAgent for InstanceLoader {
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
        let instances = lister.list_instances(&self.scope, &ListFilter::all()).await?;
        debug!(agent = AGENT, scope = %self.scope, count = instances.len(), "listed instances");
        Ok(self.build(instances))
    }
}
