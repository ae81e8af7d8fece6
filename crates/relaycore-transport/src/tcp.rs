//! Plain TCP acceptor (spec §4.1 "TCP: standard accept loop").

use crate::acceptor::Acceptor;
use crate::duplex::BoxedDuplex;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Consecutive accept failures tolerated before the caller should consider
/// the tunnel `error` (spec §4.1: "more than 5 seconds" of errors).
const CONSECUTIVE_ERROR_WINDOW: Duration = Duration::from_secs(5);

pub struct TcpAcceptor {
    listener: TcpListener,
    cancel: CancellationToken,
}

impl TcpAcceptor {
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| TransportError::BindError {
            address: addr.ip().to_string(),
            port: addr.port(),
            reason: e.to_string(),
        })?;
        info!(%addr, "TCP acceptor bound");
        Ok(Self { listener, cancel: CancellationToken::new() })
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> TransportResult<(BoxedDuplex, SocketAddr)> {
        let mut first_error_at: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => return Ok((Box::new(stream), peer)),
                        Err(e) => {
                            warn!(error = %e, "TCP accept failed");
                            let now = Instant::now();
                            let started = *first_error_at.get_or_insert(now);
                            if now.duration_since(started) > CONSECUTIVE_ERROR_WINDOW {
                                return Err(TransportError::Io(e));
                            }
                        }
                    }
                }
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn accepts_one_connection_then_stop_unblocks() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let (mut duplex, _peer) = acceptor.accept().await.unwrap();
        let mut buf = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut duplex, &mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        client.await.unwrap();

        acceptor.stop().await;
        let err = acceptor.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
