//! Multiplexer error type (spec §7 taxonomy).

use relaycore_model::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("underlying transport closed")]
    TransportClosed,

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] relaycore_proto::FrameError),

    #[error("concurrent stream limit reached")]
    StreamLimitReached,

    #[error("peer sent go-away, no new streams may be opened")]
    GoingAway,

    #[error("keepalive timed out, transport considered dead")]
    KeepaliveTimeout,

    #[error("multiplexer shut down")]
    Cancelled,
}

impl MuxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MuxError::TransportClosed | MuxError::KeepaliveTimeout => ErrorKind::TransientIo,
            MuxError::Io(_) => ErrorKind::TransientIo,
            MuxError::Protocol(_) => ErrorKind::TransientIo,
            MuxError::StreamLimitReached => ErrorKind::TransientIo,
            MuxError::GoingAway => ErrorKind::Conflict,
            MuxError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type MuxResult<T> = Result<T, MuxError>;
