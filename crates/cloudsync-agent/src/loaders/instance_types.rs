//! Instance types.
//!
//! The remote side reports one record per (type, zone); the loader folds
//! them into one entity per type with the set of zones offering it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::InstanceTypeAttributes;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Namespace, RemoteLister, Scope, SyncResult,
};
use tracing::debug;

use super::identity;
use crate::agent::{AgentDataType, CachingAgent};

const AGENT: &str = "InstanceTypeLoader";

const DATA_TYPES: &[AgentDataType] = &[AgentDataType::authoritative(Namespace::InstanceTypes)];

/// Loads instance types.
#[derive(Debug, Clone)]
pub struct InstanceTypeLoader {
    scope: Scope,
}

impl InstanceTypeLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl CachingAgent for InstanceTypeLoader {
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
        let records = lister
            .list_instance_types(&self.scope, &ListFilter::all())
            .await?;
        debug!(agent = AGENT, scope = %self.scope, count = records.len(), "listed instance types");

        let mut types: BTreeMap<String, InstanceTypeAttributes> = BTreeMap::new();
        for record in records {
            let Some(key) = identity(AGENT, &record.name, keys::instance_type(account, region, &record.name))
            else {
                continue;
            };
            types
                .entry(key)
                .or_insert_with(|| InstanceTypeAttributes {
                    account: account.clone(),
                    region: region.clone(),
                    name: record.name.clone(),
                    zones: Default::default(),
                    family: record.family.clone(),
                    cpu: record.cpu,
                    memory_mib: record.memory_mib,
                })
                .zones
                .insert(record.zone);
        }

        let mut result = CacheResult::new();
        result.declare(Namespace::InstanceTypes);
        for (key, attributes) in types {
            result.insert(
                Namespace::InstanceTypes,
                EntitySnapshot::new(key, Attributes::InstanceType(attributes)),
            );
        }
        Ok(result)
    }
}
