use relaycore_model::{OwnerId, TunnelState};

/// Narrows `list_tunnels` (spec §6: `list-tunnels(filter, page, limit)`).
#[derive(Debug, Clone, Default)]
pub struct TunnelFilter {
    pub owner: Option<OwnerId>,
    pub state: Option<TunnelState>,
    /// Excludes soft-deleted records unless explicitly requested.
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}
