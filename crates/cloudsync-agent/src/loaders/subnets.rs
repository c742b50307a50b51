//! Subnets.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::SubnetAttributes;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Namespace, RemoteLister, Scope, SyncResult,
};
use tracing::debug;

use super::identity;
use crate::agent::{AgentDataType, CachingAgent};

const AGENT: &str = "SubnetLoader";

const DATA_TYPES: &[AgentDataType] = &[
    AgentDataType::authoritative(Namespace::Subnets),
    AgentDataType::informative(Namespace::Networks),
];

/// Loads subnets and links each network to its subnets.
#[derive(Debug, Clone)]
pub struct SubnetLoader {
    scope: Scope,
}

impl SubnetLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl CachingAgent for SubnetLoader {
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
        let Scope { account, region } = &self.scope;
        let subnets = lister.list_subnets(&self.scope, &ListFilter::all()).await?;
        debug!(agent = AGENT, scope = %self.scope, count = subnets.len(), "listed subnets");

        let mut result = CacheResult::new();
        result.declare(Namespace::Subnets);
        for subnet in subnets {
            let Some(key) = identity(AGENT, &subnet.name, keys::subnet(account, region, &subnet.id))
            else {
                continue;
            };
            let mut entity = EntitySnapshot::new(
                key.clone(),
                Attributes::Subnet(SubnetAttributes {
                    account: account.clone(),
                    region: region.clone(),
                    id: subnet.id.clone(),
                    name: subnet.name,
                    network_id: subnet.network_id.clone(),
                    cidr_block: subnet.cidr_block,
                    zone: subnet.zone,
                }),
            );
            if let Some(network_key) =
                identity(AGENT, &subnet.id, keys::network(account, region, &subnet.network_id))
            {
                entity.add_relationship(Namespace::Networks, network_key.clone());
                result.merge(
                    Namespace::Networks,
                    EntitySnapshot::placeholder(network_key).with_relationship(Namespace::Subnets, key),
                );
            }
            result.insert(Namespace::Subnets, entity);
        }
        Ok(result)
    }
}
