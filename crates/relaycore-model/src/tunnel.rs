//! The durable tunnel record (spec §3) and its state machine

use crate::ids::{OwnerId, TunnelId};
use crate::transport::{MuxParams, TlsParams, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tunnel lifecycle state. Transitions are enforced by the manager (I3):
/// `inactive -> connecting -> {active, error}`, `active -> {inactive, error}`,
/// `error -> connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Inactive,
    Connecting,
    Active,
    Error,
}

impl TunnelState {
    /// Whether `self -> next` is a legal transition per invariant I3.
    pub fn can_transition_to(self, next: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self, next),
            (Inactive, Connecting)
                | (Connecting, Active)
                | (Connecting, Error)
                | (Active, Inactive)
                | (Active, Error)
                | (Error, Connecting)
        )
    }

    /// Whether a record in this state must have a live registry entry (I4).
    pub fn requires_live_instance(self) -> bool {
        matches!(self, TunnelState::Active | TunnelState::Connecting)
    }
}

/// Monotonic byte/connection counters, reset only on restart (I5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub connection_count: u64,
}

/// An endpoint the tunnel listens on or forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port 0 is not a valid endpoint port".to_string());
        }
        Ok(())
    }
}

/// The durable tunnel definition (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub id: TunnelId,
    pub owner: OwnerId,
    pub name: String,
    pub transport: Transport,
    pub listen: Endpoint,
    pub target: Endpoint,
    /// Shared secret token, >= 16 bytes of printable entropy.
    pub token: String,
    pub mux: Option<MuxParams>,
    pub tls: Option<TlsParams>,
    pub state: TunnelState,
    pub counters: Counters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TunnelRecord {
    pub const MIN_TOKEN_LEN: usize = 16;

    /// Validates the fields that are checkable without touching the filesystem
    /// or a quota table (I1/I2 are enforced by the manager against the store
    /// and caller, not here).
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        self.listen.validate().map_err(|e| format!("listen: {e}"))?;
        self.target.validate().map_err(|e| format!("target: {e}"))?;
        if self.token.len() < Self::MIN_TOKEN_LEN || !self.token.chars().all(|c| c.is_ascii_graphic()) {
            return Err(format!(
                "token must be at least {} printable bytes",
                Self::MIN_TOKEN_LEN
            ));
        }
        if self.transport.is_mux() {
            let mux = self
                .mux
                .as_ref()
                .ok_or_else(|| "mux parameters required for mux transport".to_string())?;
            mux.validate()?;
        }
        if self.transport.requires_tls() && self.tls.is_none() {
            return Err("tls parameters required for wss/wss-mux transport".to_string());
        }
        Ok(())
    }
}
