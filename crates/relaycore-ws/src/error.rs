use relaycore_model::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("failed to bind {address}:{port}: {reason}")]
    BindError { address: String, port: u16, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("upgrade rejected: missing or invalid bearer token")]
    Unauthorized,

    #[error("acceptor stopped")]
    Cancelled,
}

impl WsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WsError::BindError { .. } => ErrorKind::BindFailed,
            WsError::Io(_) => ErrorKind::TransientIo,
            WsError::Tls(_) => ErrorKind::Validation,
            WsError::Handshake(_) => ErrorKind::TransientIo,
            WsError::Unauthorized => ErrorKind::Forbidden,
            WsError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
