//! The uniform acceptor contract (spec §4.1): `listen -> stream of
//! accepted duplexes`, `stop`.

use crate::duplex::BoxedDuplex;
use crate::error::TransportResult;
use async_trait::async_trait;
use std::net::SocketAddr;

#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Accept the next connection. Blocks until one arrives, `stop()` is
    /// called, or a fatal error occurs.
    async fn accept(&self) -> TransportResult<(BoxedDuplex, SocketAddr)>;

    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Unblocks any in-flight and future `accept()` calls with
    /// `TransportError::Cancelled`.
    async fn stop(&self);
}
