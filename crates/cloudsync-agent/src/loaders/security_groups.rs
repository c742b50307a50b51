//! Security groups.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::SecurityGroupAttributes;
use cloudsync_core::remote::RemoteSecurityGroup;
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Namespace, RemoteLister, Scope, SyncResult,
};
use tracing::debug;

use super::{application_of, identity};
use crate::agent::{AgentDataType, CachingAgent};
use crate::on_demand::{OnDemandAgent, OnDemandKind};

const AGENT: &str = "SecurityGroupLoader";

const DATA_TYPES: &[AgentDataType] = &[
    AgentDataType::authoritative(Namespace::SecurityGroups),
    AgentDataType::informative(Namespace::Applications),
];

/// Loads security groups and their rules.
#[derive(Debug, Clone)]
pub struct SecurityGroupLoader {
    scope: Scope,
}

impl SecurityGroupLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    fn build(&self, groups: Vec<RemoteSecurityGroup>) -> CacheResult {
        let Scope { account, region } = &self.scope;
        let mut result = CacheResult::new();
        result.declare(Namespace::SecurityGroups);

        for group in groups {
            let Some(key) = identity(AGENT, &group.name, keys::security_group(account, region, &group.id))
            else {
                continue;
            };
            let application = application_of(&group.name);

            let mut entity = EntitySnapshot::new(
                key.clone(),
                Attributes::SecurityGroup(SecurityGroupAttributes {
                    account: account.clone(),
                    region: region.clone(),
                    id: group.id,
                    name: group.name,
                    application: application.clone(),
                    description: group.description,
                    ingress: group.ingress,
                    egress: group.egress,
                }),
            );

            if let Some(app_key) = application
                .as_deref()
                .and_then(|app| identity(AGENT, &key, keys::application(app)))
            {
                entity.add_relationship(Namespace::Applications, app_key.clone());
                result.merge(
                    Namespace::Applications,
                    EntitySnapshot::placeholder(app_key).with_relationship(Namespace::SecurityGroups, key),
                );
            }

            result.insert(Namespace::SecurityGroups, entity);
        }

        result
    }
}

#[async_trait]
impl CachingAgent for SecurityGroupLoader {
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
            .list_security_groups(&self.scope, &ListFilter::all())
            .await?;
        debug!(agent = AGENT, scope = %self.scope, count = groups.len(), "listed security groups");
        Ok(self.build(groups))
    }
}

#[async_trait]
impl OnDemandAgent for SecurityGroupLoader {
    fn on_demand_kind(&self) -> OnDemandKind {
        OnDemandKind::SecurityGroup
    }

    async fn load_one(
        &self,
        lister: &dyn RemoteLister,
        resource: &str,
    ) -> SyncResult<(String, CacheResult)> {
        let key = keys::security_group(&self.scope.account, &self.scope.region, resource)?;
        let groups = lister
            .list_security_groups(&self.scope, &ListFilter::by_id(resource))
            .await?;
        let groups = groups.into_iter().filter(|g| g.id == resource).collect();
        Ok((key, self.build(groups)))
    }
}
