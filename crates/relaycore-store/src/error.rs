use relaycore_model::{ErrorKind, TunnelId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no tunnel record found for id {0}")]
    NotFound(TunnelId),
    #[error("a tunnel named {name:?} already exists for this owner")]
    NameConflict { name: String },
    #[error("store validation failed: {0}")]
    Validation(String),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::NameConflict { .. } => ErrorKind::Conflict,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Unavailable(_) => ErrorKind::PersistentIo,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
