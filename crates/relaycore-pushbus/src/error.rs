use relaycore_model::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushBusError {
    #[error("i/o error on subscriber connection: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode push event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PushBusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PushBusError::Io(_) => ErrorKind::TransientIo,
            PushBusError::Encode(_) => ErrorKind::Internal,
        }
    }
}

pub type PushBusResult<T> = Result<T, PushBusError>;
