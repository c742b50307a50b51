//! Networks.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::NetworkAttributes;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Namespace, RemoteLister, Scope, SyncResult,
};
use tracing::debug;

use super::identity;
use crate::agent::{AgentDataType, CachingAgent};

const AGENT: &str = "NetworkLoader";

const DATA_TYPES: &[AgentDataType] = &[AgentDataType::authoritative(Namespace::Networks)];

/// Loads networks.
#[derive(Debug, Clone)]
pub struct NetworkLoader {
    scope: Scope,
}

impl NetworkLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl CachingAgent for NetworkLoader {
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
        let networks = lister.list_networks(&self.scope, &ListFilter::all()).await?;
        debug!(agent = AGENT, scope = %self.scope, count = networks.len(), "listed networks");

        let mut result = CacheResult::new();
        result.declare(Namespace::Networks);
        for network in networks {
            let Some(key) = identity(AGENT, &network.name, keys::network(account, region, &network.id))
            else {
                continue;
            };
            result.insert(
                Namespace::Networks,
                EntitySnapshot::new(
                    key,
                    Attributes::Network(NetworkAttributes {
                        account: account.clone(),
                        region: region.clone(),
                        id: network.id,
                        name: network.name,
                        cidr_block: network.cidr_block,
                        is_default: network.is_default,
                    }),
                ),
            );
        }
        Ok(result)
    }
}
