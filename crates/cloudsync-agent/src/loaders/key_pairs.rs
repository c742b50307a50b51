//! Key pairs.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::KeyPairAttributes;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Namespace, RemoteLister, Scope, SyncResult,
};
use tracing::debug;

use super::identity;
use crate::agent::{AgentDataType, CachingAgent};

const AGENT: &str = "KeyPairLoader";

const DATA_TYPES: &[AgentDataType] = &[AgentDataType::authoritative(Namespace::KeyPairs)];

/// Loads key pairs.
#[derive(Debug, Clone)]
pub struct KeyPairLoader {
    scope: Scope,
}

impl KeyPairLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl CachingAgent for KeyPairLoader {
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
        let key_pairs = lister.list_key_pairs(&self.scope, &ListFilter::all()).await?;
        debug!(agent = AGENT, scope = %self.scope, count = key_pairs.len(), "listed key pairs");

        let mut result = CacheResult::new();
        result.declare(Namespace::KeyPairs);
        for key_pair in key_pairs {
            let Some(key) = identity(AGENT, &key_pair.name, keys::key_pair(account, region, &key_pair.id))
            else {
                continue;
            };
            result.insert(
                Namespace::KeyPairs,
                EntitySnapshot::new(
                    key,
                    Attributes::KeyPair(KeyPairAttributes {
                        account: account.clone(),
                        region: region.clone(),
                        id: key_pair.id,
                        name: key_pair.name,
                        fingerprint: key_pair.fingerprint,
                    }),
                ),
            );
        }
        Ok(result)
    }
}
