//! `ManagerError` (spec §7): every public Manager operation returns this
//! rather than a raw `anyhow::Error`.

use relaycore_model::{ErrorKind, TunnelId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tunnel {0} not found")]
    NotFound(TunnelId),

    #[error("caller is not the owner or an admin")]
    Forbidden,

    #[error("name already in use: {0}")]
    NameConflict(String),

    #[error("owner has reached max-tunnels quota")]
    QuotaExceeded,

    #[error("tunnel is already running")]
    AlreadyRunning,

    #[error("tunnel is not running")]
    NotRunning,

    #[error("failed to bind: {0}")]
    BindFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::Validation(_) => ErrorKind::Validation,
            ManagerError::NotFound(_) => ErrorKind::NotFound,
            ManagerError::Forbidden => ErrorKind::Forbidden,
            ManagerError::NameConflict(_) | ManagerError::AlreadyRunning | ManagerError::NotRunning => {
                ErrorKind::Conflict
            }
            ManagerError::QuotaExceeded => ErrorKind::QuotaExceeded,
            ManagerError::BindFailed(_) => ErrorKind::BindFailed,
            ManagerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
