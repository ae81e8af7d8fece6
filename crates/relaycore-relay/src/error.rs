use relaycore_model::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to dial target: {0}")]
    DialFailed(#[from] std::io::Error),

    #[error("dial to target timed out")]
    DialTimeout,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
