//! Transport-layer error type (spec §7 taxonomy)

use relaycore_model::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {address}:{port}: {reason}")]
    BindError { address: String, port: u16, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("acceptor stopped")]
    Cancelled,
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::BindError { .. } => ErrorKind::BindFailed,
            TransportError::Io(_) | TransportError::Connection(_) => ErrorKind::TransientIo,
            TransportError::Tls(_) | TransportError::Configuration(_) => ErrorKind::Validation,
            TransportError::Protocol(_) => ErrorKind::TransientIo,
            TransportError::StreamClosed => ErrorKind::TransientIo,
            TransportError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
