use relaycore_model::{ErrorKind, TunnelId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a data-plane instance is already registered for tunnel {0}")]
    AlreadyPresent(TunnelId),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::AlreadyPresent(_) => ErrorKind::Conflict,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
