//! Quota lookup (spec §3: "User record ... the Manager reads quotas; it
//! never writes user records"). The user/role store itself is an
//! external collaborator; this crate only consumes a narrow read-only
//! contract, the same way `relaycore-auth::Authenticator` is consumed for
//! owner resolution rather than bundled in.

use async_trait::async_trait;
use relaycore_model::{OwnerId, Quota};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait QuotaSource: Send + Sync {
    async fn quota_for(&self, owner: OwnerId) -> Quota;
}

/// Reference implementation: a default quota plus per-owner overrides,
/// mirroring `relaycore_auth::StaticAuthenticator`'s fixed-table shape.
pub struct StaticQuotaSource {
    default_quota: Quota,
    overrides: RwLock<HashMap<OwnerId, Quota>>,
}

impl StaticQuotaSource {
    pub fn new(default_quota: Quota) -> Self {
        Self { default_quota, overrides: RwLock::new(HashMap::new()) }
    }

    pub async fn set_quota(&self, owner: OwnerId, quota: Quota) {
        self.overrides.write().await.insert(owner, quota);
    }
}

#[async_trait]
impl QuotaSource for StaticQuotaSource {
    async fn quota_for(&self, owner: OwnerId) -> Quota {
        self.overrides.read().await.get(&owner).copied().unwrap_or(self.default_quota)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_default_quota() {
        let source = StaticQuotaSource::new(Quota { max_tunnels: 2, max_bandwidth: 0, max_connections: 0 });
        let owner = OwnerId::new();
        assert_eq!(source.quota_for(owner).await.max_tunnels, 2);

        source.set_quota(owner, Quota { max_tunnels: 10, max_bandwidth: 0, max_connections: 0 }).await;
        assert_eq!(source.quota_for(owner).await.max_tunnels, 10);
    }
}
