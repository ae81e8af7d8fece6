//! Session Registry (C4): "a process-wide mapping from tunnel id to
//! data-plane instance ... mutation is serialized; reads may be lock-free
//! snapshots" (spec §4.4).

use crate::error::{RegistryError, RegistryResult};
use crate::instance::DataPlaneInstance;
use dashmap::DashMap;
use relaycore_model::TunnelId;
use std::sync::Arc;

/// Concurrent map keyed by tunnel id. `DashMap` gives every reader a
/// lock-free shard lookup while writers only ever contend within a
/// shard, matching the spec's "reads may be lock-free" requirement
/// without a single global `RwLock` serializing every lookup.
#[derive(Default)]
pub struct SessionRegistry {
    instances: DashMap<TunnelId, Arc<DataPlaneInstance>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TunnelId, instance: Arc<DataPlaneInstance>) -> RegistryResult<()> {
        match self.instances.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::AlreadyPresent(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(instance);
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &TunnelId) -> Option<Arc<DataPlaneInstance>> {
        self.instances.remove(id).map(|(_, v)| v)
    }

    pub fn lookup(&self, id: &TunnelId) -> Option<Arc<DataPlaneInstance>> {
        self.instances.get(id).map(|entry| entry.value().clone())
    }

    pub fn iterate(&self) -> Vec<Arc<DataPlaneInstance>> {
        self.instances.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::DataPlaneInstance;
    use async_trait::async_trait;
    use chrono::Utc;
    use relaycore_model::AtomicCounters;
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

    fn sample_instance() -> Arc<DataPlaneInstance> {
        Arc::new(DataPlaneInstance::new(TunnelId::new(), Utc::now(), Arc::new(AtomicCounters::new()), Arc::new(NoopAcceptor)))
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let registry = SessionRegistry::new();
        let inst = sample_instance();
        let id = inst.tunnel_id;
        registry.insert(id, inst.clone()).unwrap();
        assert!(matches!(registry.insert(id, inst), Err(RegistryError::AlreadyPresent(_))));
    }

    #[test]
    fn lookup_and_remove_round_trip() {
        let registry = SessionRegistry::new();
        let inst = sample_instance();
        let id = inst.tunnel_id;
        registry.insert(id, inst).unwrap();

        assert!(registry.lookup(&id).is_some());
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&id);
        assert!(removed.is_some());
        assert!(registry.lookup(&id).is_none());
    }

    #[test]
    fn iterate_snapshots_all_entries() {
        let registry = SessionRegistry::new();
        registry.insert(TunnelId::new(), sample_instance()).unwrap();
        registry.insert(TunnelId::new(), sample_instance()).unwrap();
        assert_eq!(registry.iterate().len(), 2);
    }
}
