//! Full-scan loaders, one per resource family.
//!
//! Each loader lists one family for its scope and maps the records into a
//! [`CacheResult`](cloudsync_cache::CacheResult). Loaders that can refresh a
//! single resource also implement [`OnDemandAgent`](crate::OnDemandAgent)
//! and share their mapping code between both paths.

mod images;
mod instance_types;
mod instances;
mod key_pairs;
mod load_balancers;
mod networks;
mod security_groups;
mod server_groups;
mod subnets;

pub use images::ImageLoader;
pub use instance_types::InstanceTypeLoader;
pub use instances::InstanceLoader;
pub use key_pairs::KeyPairLoader;
pub use load_balancers::LoadBalancerLoader;
pub use networks::NetworkLoader;
pub use security_groups::SecurityGroupLoader;
pub use server_groups::ServerGroupLoader;
pub use subnets::SubnetLoader;

use cloudsync_core::{Moniker, SyncResult};
use tracing::warn;

/// Unwrap a derived key, logging and skipping the record on failure.
pub(crate) fn identity(agent: &str, resource: &str, key: SyncResult<String>) -> Option<String> {
    match key {
        Ok(key) => Some(key),
        Err(error) => {
            warn!(agent, resource, %error, "skipping resource without usable identity");
            None
        }
    }
}

/// The application a resource belongs to, from its name prefix.
pub(crate) fn application_of(name: &str) -> Option<String> {
    Moniker::parse(name)
        .map(|m| m.application().to_string())
        .filter(|app| !app.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_core::keys;

    #[test]
    fn identity_skips_bad_keys() {
        assert_eq!(
            identity("test", "sg-1", keys::security_group("prod", "r1", "sg-1")),
            Some("sg:prod:r1:sg-1".to_string())
        );
        assert_eq!(identity("test", "", keys::security_group("prod", "r1", "")), None);
    }

    #[test]
    fn application_from_name_prefix() {
        assert_eq!(application_of("web-prod-v001").as_deref(), Some("web"));
        assert_eq!(application_of("web").as_deref(), Some("web"));
        assert_eq!(application_of(""), None);
    }
}
