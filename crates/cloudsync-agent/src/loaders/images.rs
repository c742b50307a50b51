//! Images, and the image-name index across regions.

use async_trait::async_trait;
use cloudsync_cache::CacheResult;
use cloudsync_core::entity::{ImageAttributes, NamedImageAttributes};
use cloudsync_core::{
    keys, Attributes, EntitySnapshot, ListFilter, Namespace, RemoteLister, Scope, SyncResult,
};
use tracing::debug;

use super::identity;
use crate::agent::{AgentDataType, CachingAgent};

const AGENT: &str = "ImageLoader";

const DATA_TYPES: &[AgentDataType] = &[
    AgentDataType::authoritative(Namespace::Images),
    AgentDataType::authoritative(Namespace::NamedImages),
];

/// Loads images and indexes them by name.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    scope: Scope,
}

impl ImageLoader {
    /// Create a loader for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl CachingAgent for ImageLoader {
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
        let images = lister.list_images(&self.scope, &ListFilter::all()).await?;
        debug!(agent = AGENT, scope = %self.scope, count = images.len(), "listed images");

        let mut result = CacheResult::new();
        result
            .declare(Namespace::Images)
            .declare(Namespace::NamedImages);

        for image in images {
            let Some(key) = identity(AGENT, &image.name, keys::image(account, region, &image.id))
            else {
                continue;
            };
            let mut entity = EntitySnapshot::new(
                key.clone(),
                Attributes::Image(ImageAttributes {
                    account: account.clone(),
                    region: region.clone(),
                    id: image.id.clone(),
                    name: image.name.clone(),
                    os_name: image.os_name,
                    image_type: image.image_type,
                    state: image.state,
                    snapshot_ids: image.snapshot_ids,
                    created_at: image.created_at,
                }),
            );

            if let Some(name_key) = identity(AGENT, &image.id, keys::named_image(account, &image.name)) {
                entity.add_relationship(Namespace::NamedImages, name_key.clone());
                result.merge(
                    Namespace::NamedImages,
                    EntitySnapshot::new(
                        name_key,
                        Attributes::NamedImage(NamedImageAttributes {
                            account: account.clone(),
                            name: image.name,
                        }),
                    )
                    .with_relationship(Namespace::Images, key),
                );
            }
            result.insert(Namespace::Images, entity);
        }
        Ok(result)
    }
}
