//! Metrics Collector (C6). Runs as two independent `tokio::spawn`ed
//! loops owned by the composition root: a 10-second sampling loop and an
//! hourly retention-GC loop, matching the teacher's convention of
//! aborting a held `JoinHandle` directly on shutdown rather than
//! threading a cancellation token through every periodic task.

use crate::config::MetricsConfig;
use chrono::Utc;
use relaycore_model::{MetricSample, TunnelId};
use relaycore_pushbus::{PushBus, PushEvent};
use relaycore_registry::SessionRegistry;
use relaycore_store::TunnelStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct PreviousSample {
    taken_at: chrono::DateTime<Utc>,
    total_bytes: u64,
}

pub struct MetricsCollector {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn TunnelStore>,
    push_bus: Arc<PushBus>,
    config: MetricsConfig,
    previous: Mutex<HashMap<TunnelId, PreviousSample>>,
}

impl MetricsCollector {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn TunnelStore>,
        push_bus: Arc<PushBus>,
        config: MetricsConfig,
    ) -> Arc<Self> {
        Arc::new(Self { registry, store, push_bus, config, previous: Mutex::new(HashMap::new()) })
    }

    /// Spawns the sampling loop. The Collector "never mutates tunnel
    /// records directly; any state conclusions are drawn by the Manager"
    /// (spec §4.6) — this loop only samples, appends, and publishes.
    pub fn spawn_sampling_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sample_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.sample_tick().await;
            }
        })
    }

    /// Spawns the hourly retention-GC loop (spec §4.6: "issues a periodic
    /// delete request once per hour").
    pub fn spawn_retention_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.retention_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let cutoff = Utc::now() - self.config.retention;
                match self.store.delete_metrics_older_than(cutoff).await {
                    Ok(removed) => debug!(removed, "retention GC deleted metric samples"),
                    Err(e) => warn!(error = %e, "retention GC failed"),
                }
            }
        })
    }

    async fn sample_tick(&self) {
        let now = Utc::now();
        for instance in self.registry.iterate() {
            let snapshot = instance.counters_snapshot();
            let total_bytes = snapshot.bytes_in + snapshot.bytes_out;

            let bytes_per_second = {
                let mut previous = self.previous.lock().unwrap();
                let rate = match previous.get(&instance.tunnel_id) {
                    Some(prev) if total_bytes >= prev.total_bytes => {
                        let elapsed = (now - prev.taken_at).num_milliseconds().max(1) as f64 / 1000.0;
                        (total_bytes - prev.total_bytes) as f64 / elapsed
                    }
                    _ => 0.0,
                };
                previous.insert(instance.tunnel_id, PreviousSample { taken_at: now, total_bytes });
                rate
            };

            instance.touch_ping(now);

            let sample = MetricSample {
                tunnel_id: instance.tunnel_id,
                taken_at: now,
                bytes_in: snapshot.bytes_in,
                bytes_out: snapshot.bytes_out,
                connection_count: snapshot.connection_count,
                last_ping: instance.last_ping(),
                bytes_per_second,
                // We only reach this point for instances still present in
                // the registry, which is itself evidence the instance is
                // alive; there is no deeper health probe at this layer.
                live: true,
            };

            if let Err(e) = self.store.append_metric_sample(sample).await {
                warn!(tunnel_id = %instance.tunnel_id, error = %e, "failed to append metric sample");
            }

            self.publish(instance.tunnel_id, sample).await;
        }
    }

    async fn publish(&self, tunnel_id: TunnelId, sample: MetricSample) {
        match self.store.get_tunnel_by_id(tunnel_id).await {
            Ok(record) => self.push_bus.clone().to_owner(record.owner, PushEvent::MetricsUpdate(sample)).await,
            Err(e) => {
                warn!(tunnel_id = %tunnel_id, error = %e, "could not resolve owner for metrics-update, broadcasting to all");
                self.push_bus.clone().to_all(PushEvent::MetricsUpdate(sample)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaycore_model::{AtomicCounters, Endpoint, OwnerId, Transport, TunnelRecord, TunnelState};
    use relaycore_store::InMemoryTunnelStore;
    use relaycore_transport::{Acceptor, BoxedDuplex, TransportResult};
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

    fn sample_record(owner: OwnerId, id: TunnelId) -> TunnelRecord {
        let now = Utc::now();
        TunnelRecord {
            id,
            owner,
            name: "t1".to_string(),
            transport: Transport::Tcp,
            listen: Endpoint { host: "127.0.0.1".to_string(), port: 19001 },
            target: Endpoint { host: "127.0.0.1".to_string(), port: 19101 },
            token: "0123456789abcdef".to_string(),
            mux: None,
            tls: None,
            state: TunnelState::Active,
            counters: Default::default(),
            created_at: now,
            updated_at: now,
            last_seen: None,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn sample_tick_appends_history_and_touches_last_ping() {
        let registry = Arc::new(SessionRegistry::new());
        let store: Arc<dyn TunnelStore> = Arc::new(InMemoryTunnelStore::new());
        let push_bus = Arc::new(PushBus::new());
        let owner = OwnerId::new();
        let tunnel_id = TunnelId::new();

        store.insert_tunnel(sample_record(owner, tunnel_id)).await.unwrap();

        let counters = Arc::new(AtomicCounters::new());
        counters.add_bytes_in(100);
        let instance = Arc::new(relaycore_registry::DataPlaneInstance::new(
            tunnel_id,
            Utc::now(),
            counters,
            Arc::new(NoopAcceptor),
        ));
        registry.insert(tunnel_id, instance.clone()).unwrap();

        let collector = MetricsCollector::new(registry, store.clone(), push_bus, MetricsConfig::default());
        collector.sample_tick().await;

        assert!(instance.last_ping().is_some());
        let history = store
            .query_metric_range(tunnel_id, Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].bytes_in, 100);
        assert!(history[0].live);
    }

    #[tokio::test]
    async fn second_tick_derives_a_nonzero_rate() {
        let registry = Arc::new(SessionRegistry::new());
        let store: Arc<dyn TunnelStore> = Arc::new(InMemoryTunnelStore::new());
        let push_bus = Arc::new(PushBus::new());
        let owner = OwnerId::new();
        let tunnel_id = TunnelId::new();
        store.insert_tunnel(sample_record(owner, tunnel_id)).await.unwrap();

        let counters = Arc::new(AtomicCounters::new());
        let instance = Arc::new(relaycore_registry::DataPlaneInstance::new(
            tunnel_id,
            Utc::now(),
            counters.clone(),
            Arc::new(NoopAcceptor),
        ));
        registry.insert(tunnel_id, instance).unwrap();

        let collector = MetricsCollector::new(registry, store.clone(), push_bus, MetricsConfig::default());
        collector.sample_tick().await;
        counters.add_bytes_out(1_000_000);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        collector.sample_tick().await;

        let history = store
            .query_metric_range(tunnel_id, Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].bytes_per_second > 0.0);
    }
}
