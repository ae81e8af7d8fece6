//! Tunnel Manager (C5): the public contract of spec §4.5, composing the
//! transport acceptors, multiplexer, relay, registry, store, cache and
//! push bus into start/stop orchestration plus tunnel CRUD.

use crate::caller::Caller;
use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::patch::TunnelPatch;
use crate::quota::QuotaSource;
use crate::status::TunnelStatus;
use crate::supervisor::Supervisor;
use crate::udp_handle::UdpAcceptorHandle;
use chrono::Utc;
use relaycore_cache::CachePubSub;
use relaycore_model::{AtomicCounters, OwnerId, Transport, TunnelId, TunnelRecord, TunnelState};
use relaycore_mux::{Multiplexer, Role};
use relaycore_pushbus::PushEvent;
use relaycore_registry::{DataPlaneInstance, SessionRegistry};
use relaycore_relay::relay;
use relaycore_store::{Page, TunnelFilter, TunnelStore};
use relaycore_transport::{Acceptor, BoxedDuplex, TcpAcceptor, TransportError, UdpForwarder};
use relaycore_ws::WsAcceptor;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

const FEDERATION_CHANNEL: &str = "relaycore.push-bus.state-changed";

pub struct TunnelManager {
    self_weak: Weak<TunnelManager>,
    store: Arc<dyn TunnelStore>,
    cache: Arc<dyn CachePubSub>,
    registry: Arc<SessionRegistry>,
    push_bus: Arc<relaycore_pushbus::PushBus>,
    quota_source: Arc<dyn QuotaSource>,
    config: ManagerConfig,
    supervisors: StdMutex<HashMap<TunnelId, Supervisor>>,
}

impl TunnelManager {
    pub fn new(
        store: Arc<dyn TunnelStore>,
        cache: Arc<dyn CachePubSub>,
        registry: Arc<SessionRegistry>,
        push_bus: Arc<relaycore_pushbus::PushBus>,
        quota_source: Arc<dyn QuotaSource>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            store,
            cache,
            registry,
            push_bus,
            quota_source,
            config,
            supervisors: StdMutex::new(HashMap::new()),
        })
    }

    #[instrument(skip(self, record), fields(owner = %record.owner, name = %record.name))]
    pub async fn create(&self, mut record: TunnelRecord) -> ManagerResult<TunnelRecord> {
        record.validate().map_err(ManagerError::Validation)?;

        let quota = self.quota_source.quota_for(record.owner).await;
        let current = self.store.count_tunnels_by_owner(record.owner).await.map_err(store_err)?;
        if current >= quota.max_tunnels as usize {
            return Err(ManagerError::QuotaExceeded);
        }

        let now = Utc::now();
        record.state = TunnelState::Inactive;
        record.counters = Default::default();
        record.created_at = now;
        record.updated_at = now;
        record.last_seen = None;
        record.deleted_at = None;

        let stored = self.store.insert_tunnel(record).await.map_err(store_err)?;
        info!(tunnel_id = %stored.id, "tunnel created");
        Ok(stored)
    }

    #[instrument(skip(self, patch), fields(%id))]
    pub async fn update(&self, id: TunnelId, patch: TunnelPatch, caller: Caller) -> ManagerResult<TunnelRecord> {
        let mut record = self.store.get_tunnel_by_id(id).await.map_err(store_err)?;
        if !caller.permits(record.owner) {
            return Err(ManagerError::Forbidden);
        }

        let was_running = self.registry.lookup(&id).is_some();
        if was_running {
            self.stop(id, caller).await?;
        }

        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(listen) = patch.listen {
            record.listen = listen;
        }
        if let Some(target) = patch.target {
            record.target = target;
        }
        if let Some(token) = patch.token {
            record.token = token;
        }
        if let Some(mux) = patch.mux {
            record.mux = Some(mux);
        }
        if let Some(tls) = patch.tls {
            record.tls = Some(tls);
        }
        record.validate().map_err(ManagerError::Validation)?;
        record.updated_at = Utc::now();

        let stored = self.store.update_tunnel(record).await.map_err(store_err)?;
        info!(tunnel_id = %id, "tunnel updated");
        Ok(stored)
    }

    #[instrument(skip(self), fields(%id))]
    pub async fn delete(&self, id: TunnelId, caller: Caller) -> ManagerResult<()> {
        let record = self.store.get_tunnel_by_id(id).await.map_err(store_err)?;
        if !caller.permits(record.owner) {
            return Err(ManagerError::Forbidden);
        }
        if self.registry.lookup(&id).is_some() {
            self.stop(id, caller).await?;
        }
        self.store.delete_tunnel(id, Utc::now()).await.map_err(store_err)?;
        info!(tunnel_id = %id, "tunnel deleted");
        Ok(())
    }

    /// Start algorithm (spec §4.5): validate ownership and quota,
    /// transition to `connecting`, bind the transport, transition to
    /// `active` on success or `error` on bind failure.
    #[instrument(skip(self), fields(%id))]
    pub async fn start(&self, id: TunnelId, caller: Caller) -> ManagerResult<()> {
        let mut record = self.store.get_tunnel_by_id(id).await.map_err(store_err)?;
        if !caller.permits(record.owner) {
            return Err(ManagerError::Forbidden);
        }
        if record.state.requires_live_instance() || self.registry.lookup(&id).is_some() {
            return Err(ManagerError::AlreadyRunning);
        }

        let quota = self.quota_source.quota_for(record.owner).await;
        let current = self.store.count_tunnels_by_owner(record.owner).await.map_err(store_err)?;
        if current > quota.max_tunnels as usize {
            return Err(ManagerError::QuotaExceeded);
        }

        record.state = TunnelState::Connecting;
        record.updated_at = Utc::now();
        record = self.store.update_tunnel(record).await.map_err(store_err)?;
        self.emit_state_change(record.owner, id, TunnelState::Connecting).await;

        match self.bind_and_spawn(&record).await {
            Ok(()) => {
                record.state = TunnelState::Active;
                record.updated_at = Utc::now();
                let _ = self.store.update_tunnel(record.clone()).await;
                self.emit_state_change(record.owner, id, TunnelState::Active).await;
                info!(tunnel_id = %id, "tunnel started");
                Ok(())
            }
            Err(e) => {
                record.state = TunnelState::Error;
                record.updated_at = Utc::now();
                let _ = self.store.update_tunnel(record.clone()).await;
                self.emit_state_change(record.owner, id, TunnelState::Error).await;
                warn!(tunnel_id = %id, error = %e, "tunnel failed to start");
                Err(e)
            }
        }
    }

    /// Stop algorithm (spec §4.5): signal stop, wait up to `stop_grace`
    /// for drain, force-close on timeout.
    #[instrument(skip(self), fields(%id))]
    pub async fn stop(&self, id: TunnelId, caller: Caller) -> ManagerResult<()> {
        let mut record = self.store.get_tunnel_by_id(id).await.map_err(store_err)?;
        if !caller.permits(record.owner) {
            return Err(ManagerError::Forbidden);
        }
        let Supervisor { cancel, mut accept_task, relay_tasks } =
            self.supervisors.lock().unwrap().remove(&id).ok_or(ManagerError::NotRunning)?;

        let instance = self.registry.lookup(&id);
        cancel.cancel();
        if let Some(instance) = &instance {
            instance.stop().await;
        }

        let drain = async {
            let _ = (&mut accept_task).await;
            loop {
                let mut tasks = relay_tasks.lock().await;
                if tasks.join_next().await.is_none() {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.config.stop_grace, drain).await.is_err() {
            warn!(tunnel_id = %id, "stop grace period exceeded, force-closing");
            accept_task.abort();
            relay_tasks.lock().await.abort_all();
        }

        // Snapshot counters after the drain (or force-close) so the
        // persisted record reflects bytes actually relayed up to
        // termination, not the count at the moment stop() was invoked.
        if let Some(instance) = &instance {
            record.counters = instance.counters_snapshot();
        }
        self.registry.remove(&id);
        record.state = TunnelState::Inactive;
        record.updated_at = Utc::now();
        let _ = self.store.update_tunnel(record.clone()).await;
        self.emit_state_change(record.owner, id, TunnelState::Inactive).await;
        info!(tunnel_id = %id, "tunnel stopped");
        Ok(())
    }

    pub async fn status(&self, id: TunnelId) -> ManagerResult<TunnelStatus> {
        let record = self.store.get_tunnel_by_id(id).await.map_err(store_err)?;
        let (counters, last_ping) = match self.registry.lookup(&id) {
            Some(instance) => (instance.counters_snapshot(), instance.last_ping()),
            None => (record.counters, record.last_seen),
        };
        let window_end = Utc::now();
        let history = self
            .store
            .query_metric_range(id, window_end - chrono::Duration::minutes(1), window_end)
            .await
            .map_err(store_err)?;
        let performance = history.into_iter().max_by_key(|s| s.taken_at);

        Ok(TunnelStatus { state: record.state, last_ping, counters, performance })
    }

    pub async fn list(&self, filter: TunnelFilter, page: Page) -> ManagerResult<Vec<TunnelRecord>> {
        let mut records = self.store.list_tunnels(filter, page).await.map_err(store_err)?;
        for record in &mut records {
            if let Some(instance) = self.registry.lookup(&record.id) {
                record.counters = instance.counters_snapshot();
                record.last_seen = instance.last_ping();
            }
        }
        Ok(records)
    }

    /// Invoked when a running instance's accept loop dies of a
    /// `persistent-io` error rather than a requested stop (spec §4.5:
    /// "the Manager receives the completion signal, transitions the
    /// record to `error`, removes the registry entry, and emits an
    /// event. Automatic restart is not performed").
    async fn handle_instance_failure(&self, id: TunnelId, owner: OwnerId) {
        self.supervisors.lock().unwrap().remove(&id);
        self.registry.remove(&id);
        if let Ok(mut record) = self.store.get_tunnel_by_id(id).await {
            record.state = TunnelState::Error;
            record.updated_at = Utc::now();
            let _ = self.store.update_tunnel(record).await;
        }
        self.emit_state_change(owner, id, TunnelState::Error).await;
        error!(tunnel_id = %id, "data-plane instance exited unexpectedly, tunnel marked error");
    }

    /// Publishes a state transition both to local subscribers and, via
    /// the cache's fire-and-forget channel, to any other control-plane
    /// replica's Push Bus (spec §6: "used for cross-process Push Bus
    /// federation if multiple control-plane replicas exist").
    async fn emit_state_change(&self, owner: OwnerId, tunnel_id: TunnelId, state: TunnelState) {
        let event = PushEvent::StateChanged { tunnel_id, state };
        self.push_bus.to_owner(owner, event.clone()).await;
        if let Ok(payload) = serde_json::to_vec(&event) {
            self.cache.publish(FEDERATION_CHANNEL, payload).await;
        }
    }

    async fn bind_and_spawn(&self, record: &TunnelRecord) -> ManagerResult<()> {
        let listen: SocketAddr = format!("{}:{}", record.listen.host, record.listen.port)
            .parse()
            .map_err(|e| ManagerError::Validation(format!("invalid listen address: {e}")))?;
        let target: SocketAddr = format!("{}:{}", record.target.host, record.target.port)
            .parse()
            .map_err(|e| ManagerError::Validation(format!("invalid target address: {e}")))?;

        let counters = Arc::new(AtomicCounters::new());
        let cancel = CancellationToken::new();
        let relay_tasks: Arc<tokio::sync::Mutex<JoinSet<()>>> = Arc::new(tokio::sync::Mutex::new(JoinSet::new()));

        let acceptor: Arc<dyn Acceptor> = match record.transport {
            Transport::Tcp => Arc::new(TcpAcceptor::bind(listen).await.map_err(bind_err)?),
            Transport::TcpMux => Arc::new(TcpAcceptor::bind(listen).await.map_err(bind_err)?),
            Transport::Ws | Transport::WsMux => {
                Arc::new(WsAcceptor::bind_ws(listen, record.token.clone()).await.map_err(ws_bind_err)?)
            }
            Transport::Wss | Transport::WssMux => {
                let tls = record.tls.as_ref().ok_or_else(|| ManagerError::Validation("missing tls params".into()))?;
                Arc::new(WsAcceptor::bind_wss(listen, record.token.clone(), tls).await.map_err(ws_bind_err)?)
            }
            Transport::Udp => {
                let forwarder = UdpForwarder::bind(listen, target, counters.clone()).await.map_err(bind_err)?;
                let local_addr = forwarder.local_addr().map_err(bind_err)?;
                let udp_cancel = forwarder.cancellation_token();
                let mut tasks = relay_tasks.lock().await;
                tasks.spawn(async move {
                    if let Err(e) = forwarder.run().await {
                        warn!(error = %e, "UDP forwarder exited");
                    }
                });
                drop(tasks);
                Arc::new(UdpAcceptorHandle::new(local_addr, udp_cancel))
            }
        };

        let instance = Arc::new(DataPlaneInstance::new(record.id, Utc::now(), counters.clone(), acceptor.clone()));
        self.registry.insert(record.id, instance).map_err(|e| ManagerError::Internal(e.to_string()))?;

        if record.transport != Transport::Udp {
            let accept_task = tokio::spawn(accept_loop(
                self.self_weak.clone(),
                record.id,
                record.owner,
                acceptor,
                target,
                record.mux,
                counters,
                relay_tasks.clone(),
                cancel.clone(),
            ));
            self.supervisors.lock().unwrap().insert(record.id, Supervisor { cancel, accept_task, relay_tasks });
        } else {
            // The UDP forwarder task itself is the "accept loop" for
            // bookkeeping purposes; there is no separate per-connection
            // accept stage to supervise.
            let accept_task = tokio::spawn(async {});
            self.supervisors.lock().unwrap().insert(record.id, Supervisor { cancel, accept_task, relay_tasks });
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    manager: Weak<TunnelManager>,
    tunnel_id: TunnelId,
    owner: OwnerId,
    acceptor: Arc<dyn Acceptor>,
    target: SocketAddr,
    mux_params: Option<relaycore_model::MuxParams>,
    counters: Arc<AtomicCounters>,
    relay_tasks: Arc<tokio::sync::Mutex<JoinSet<()>>>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = acceptor.accept() => result,
        };

        match accepted {
            Ok((duplex, peer)) => match mux_params {
                Some(params) => spawn_mux_session(duplex, params, target, counters.clone(), relay_tasks.clone(), cancel.clone()),
                None => {
                    let counters = counters.clone();
                    relay_tasks.lock().await.spawn(async move {
                        let _ = relay(duplex, target, counters).await;
                    });
                    let _ = peer;
                }
            },
            Err(TransportError::Cancelled) => break,
            Err(e) => {
                warn!(tunnel_id = %tunnel_id, error = %e, "accept loop ended with a persistent error");
                if let Some(manager) = manager.upgrade() {
                    manager.handle_instance_failure(tunnel_id, owner).await;
                }
                return;
            }
        }
    }
}

fn spawn_mux_session(
    duplex: BoxedDuplex,
    params: relaycore_model::MuxParams,
    target: SocketAddr,
    counters: Arc<AtomicCounters>,
    relay_tasks: Arc<tokio::sync::Mutex<JoinSet<()>>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mux = Multiplexer::new(duplex, Role::Server, params);
        loop {
            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    mux.go_away();
                    break;
                }
                stream = mux.accept_stream() => stream,
            };
            match stream {
                Ok(stream) => {
                    let counters = counters.clone();
                    relay_tasks.lock().await.spawn(async move {
                        let _ = relay(stream, target, counters).await;
                    });
                }
                Err(_) => break,
            }
        }
        mux.shutdown();
    });
}

fn store_err(e: relaycore_store::StoreError) -> ManagerError {
    match e {
        relaycore_store::StoreError::NotFound(id) => ManagerError::NotFound(id),
        relaycore_store::StoreError::NameConflict { name } => ManagerError::NameConflict(name),
        relaycore_store::StoreError::Validation(msg) => ManagerError::Validation(msg),
        relaycore_store::StoreError::Unavailable(msg) => ManagerError::Internal(msg),
    }
}

fn bind_err(e: TransportError) -> ManagerError {
    ManagerError::BindFailed(e.to_string())
}

fn ws_bind_err(e: relaycore_ws::WsError) -> ManagerError {
    ManagerError::BindFailed(e.to_string())
}
