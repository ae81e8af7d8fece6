//! UDP doesn't fit the per-connection `Acceptor` contract (it has no
//! discrete "accept", traffic is demultiplexed internally by
//! [`relaycore_transport::UdpForwarder`]). This wraps the forwarder's
//! cancellation so [`relaycore_registry::DataPlaneInstance`] still gets a
//! uniform stop handle regardless of transport.

use async_trait::async_trait;
use relaycore_transport::{Acceptor, BoxedDuplex, TransportResult};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

pub struct UdpAcceptorHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl UdpAcceptorHandle {
    pub fn new(local_addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self { local_addr, cancel }
    }
}

#[async_trait]
impl Acceptor for UdpAcceptorHandle {
    async fn accept(&self) -> TransportResult<(BoxedDuplex, SocketAddr)> {
        self.cancel.cancelled().await;
        Err(relaycore_transport::TransportError::Cancelled)
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }
}
