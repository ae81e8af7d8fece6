//! The error taxonomy shared across the tunnel core (spec §7).
//!
//! This is a classification, not an exception hierarchy: every concrete
//! error type in the workspace (`ManagerError`, `TransportError`, ...)
//! exposes a `kind() -> ErrorKind` so callers above the core can branch on
//! category without matching on every variant of every crate's error enum.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    QuotaExceeded,
    BindFailed,
    TransientIo,
    PersistentIo,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether this kind is meant to be surfaced to the calling operator,
    /// per the "Surfaced to caller?" column of spec §7.
    pub fn is_user_visible(self) -> bool {
        !matches!(self, ErrorKind::TransientIo | ErrorKind::Cancelled)
    }
}
