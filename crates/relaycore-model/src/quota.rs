//! User records and quotas (referenced, not owned, by the manager)

use crate::ids::OwnerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Moderator,
    User,
    Guest,
}

/// Per-owner resource limits. The manager reads these; it never writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub max_tunnels: u32,
    pub max_bandwidth: u64,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: OwnerId,
    pub role: Role,
    pub quota: Quota,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}
