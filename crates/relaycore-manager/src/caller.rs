use relaycore_model::OwnerId;

/// The identity invoking a Manager operation, resolved upstream by the
/// control-plane HTTP layer (out of scope here) before the call reaches
/// the core.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub owner: OwnerId,
    pub is_admin: bool,
}

impl Caller {
    pub fn new(owner: OwnerId, is_admin: bool) -> Self {
        Self { owner, is_admin }
    }

    /// Whether this caller may act on a resource owned by `resource_owner`
    /// (spec §4.5: "verify caller owns or is admin").
    pub fn permits(&self, resource_owner: OwnerId) -> bool {
        self.is_admin || self.owner == resource_owner
    }
}
