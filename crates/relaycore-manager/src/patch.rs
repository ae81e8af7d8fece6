use relaycore_model::{Endpoint, MuxParams, TlsParams};

/// Mutable fields of a tunnel record (spec §4.5 `update`). Fields left
/// `None` are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TunnelPatch {
    pub name: Option<String>,
    pub listen: Option<Endpoint>,
    pub target: Option<Endpoint>,
    pub token: Option<String>,
    pub mux: Option<MuxParams>,
    pub tls: Option<TlsParams>,
}
