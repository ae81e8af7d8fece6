//! A running tunnel's data-plane instance (spec §3: "ephemeral ... tunnel
//! id, started-at, last-ping, stop-signal, live counter snapshot, and a
//! handle to the underlying acceptor").

use chrono::{DateTime, Utc};
use relaycore_model::{AtomicCounters, Counters, TunnelId};
use relaycore_transport::Acceptor;
use std::sync::{Arc, Mutex};

pub struct DataPlaneInstance {
    pub tunnel_id: TunnelId,
    pub started_at: DateTime<Utc>,
    last_ping: Mutex<Option<DateTime<Utc>>>,
    counters: Arc<AtomicCounters>,
    acceptor: Arc<dyn Acceptor>,
}

impl DataPlaneInstance {
    pub fn new(tunnel_id: TunnelId, started_at: DateTime<Utc>, counters: Arc<AtomicCounters>, acceptor: Arc<dyn Acceptor>) -> Self {
        Self { tunnel_id, started_at, last_ping: Mutex::new(None), counters, acceptor }
    }

    pub fn counters(&self) -> &Arc<AtomicCounters> {
        &self.counters
    }

    pub fn counters_snapshot(&self) -> Counters {
        self.counters.snapshot()
    }

    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        *self.last_ping.lock().unwrap()
    }

    /// Recorded by the Metrics Collector on each sampling tick (spec §4.6).
    pub fn touch_ping(&self, at: DateTime<Utc>) {
        *self.last_ping.lock().unwrap() = Some(at);
    }

    /// Unblocks the acceptor's accept loop so the data-plane instance can
    /// wind down (spec §4.4: "the registry does not start or stop
    /// instances; it only records them" — this is invoked by whoever
    /// removes the instance, not by the registry itself).
    pub async fn stop(&self) {
        self.acceptor.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_transport::{BoxedDuplex, TransportResult};
    use async_trait::async_trait;
    use std::net::SocketAddr;

    struct NoopAcceptor;

    #[async_trait]
    impl Acceptor for NoopAcceptor {
        async fn accept(&self) -> TransportResult<(BoxedDuplex, SocketAddr)> {
            std::future::pending().await
        }
        fn local_addr(&self) -> TransportResult<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
        async fn stop(&self) {}
    }

    #[tokio::test]
    async fn tracks_last_ping_and_counters() {
        let inst = DataPlaneInstance::new(TunnelId::new(), Utc::now(), Arc::new(AtomicCounters::new()), Arc::new(NoopAcceptor));
        assert!(inst.last_ping().is_none());
        let now = Utc::now();
        inst.touch_ping(now);
        assert_eq!(inst.last_ping(), Some(now));

        inst.counters().add_bytes_in(5);
        assert_eq!(inst.counters_snapshot().bytes_in, 5);
    }
}
