//! End-to-end scenarios driving the Manager through real transports and a
//! real Push Bus subscriber, rather than mocking the pieces it composes.

use futures_util::StreamExt;
use relaycore_cache::InMemoryCache;
use relaycore_manager::{Caller, ManagerConfig, ManagerError, QuotaSource, StaticQuotaSource, TunnelManager};
use relaycore_metrics::{MetricsCollector, MetricsConfig};
use relaycore_model::{Endpoint, MuxParams, OwnerId, Quota, Transport, TunnelId, TunnelRecord, TunnelState};
use relaycore_mux::{Multiplexer, Role};
use relaycore_pushbus::{PushBus, PushEvent};
use relaycore_registry::SessionRegistry;
use relaycore_store::InMemoryTunnelStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

fn build_manager(max_tunnels: u32) -> Arc<TunnelManager> {
    TunnelManager::new(
        Arc::new(InMemoryTunnelStore::new()),
        Arc::new(InMemoryCache::new()),
        Arc::new(SessionRegistry::new()),
        Arc::new(PushBus::new()),
        Arc::new(StaticQuotaSource::new(Quota { max_tunnels, max_bandwidth: 0, max_connections: 0 })),
        ManagerConfig::default(),
    )
}

fn draft_record(owner: OwnerId, name: &str, listen_port: u16, target_port: u16) -> TunnelRecord {
    let now = chrono::Utc::now();
    TunnelRecord {
        id: TunnelId::new(),
        owner,
        name: name.to_string(),
        transport: Transport::Tcp,
        listen: Endpoint { host: "127.0.0.1".to_string(), port: listen_port },
        target: Endpoint { host: "127.0.0.1".to_string(), port: target_port },
        token: "0123456789abcdef".to_string(),
        mux: None,
        tls: None,
        state: TunnelState::Inactive,
        counters: Default::default(),
        created_at: now,
        updated_at: now,
        last_seen: None,
        deleted_at: None,
    }
}

async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut sock, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    let n = match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if sock.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

async fn spawn_idle_target() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { while listener.accept().await.is_ok() {} });
    port
}

/// Scenario 1: TCP passthrough. Counters track the exact bytes relayed
/// and there is exactly one counted connection; stop leaves the tunnel
/// `inactive`.
#[tokio::test]
async fn tcp_passthrough_counts_bytes_exactly() {
    let manager = build_manager(10);
    let owner = OwnerId::new();
    let target_port = spawn_echo_server().await;

    let record = manager.create(draft_record(owner, "t1", 19301, target_port)).await.unwrap();
    let caller = Caller::new(owner, false);
    manager.start(record.id, caller).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", 19301u16)).await.unwrap();
    client.write_all(b"PING").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"PING");
    drop(client);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = manager.status(record.id).await.unwrap();
    assert_eq!(status.counters.bytes_in, 4);
    assert_eq!(status.counters.bytes_out, 4);
    assert_eq!(status.counters.connection_count, 1);

    manager.stop(record.id, caller).await.unwrap();
    let status = manager.status(record.id).await.unwrap();
    assert_eq!(status.state, TunnelState::Inactive);
}

/// Scenario 2 (approximated over plain WS rather than WSS, to avoid
/// fixturing a TLS certificate here — the upgrade gate it exercises,
/// `auth_callback` in `relaycore-ws`, is shared by both). A bad bearer
/// token is rejected with a failed handshake and leaves counters and
/// state untouched; the accept loop keeps serving afterward.
#[tokio::test]
async fn ws_upgrade_with_wrong_bearer_token_is_rejected() {
    let manager = build_manager(10);
    let owner = OwnerId::new();
    let target_port = spawn_idle_target().await;

    let mut record = draft_record(owner, "t2", 19302, target_port);
    record.transport = Transport::Ws;
    record.token = "s3cret".to_string();
    let record = manager.create(record).await.unwrap();
    let caller = Caller::new(owner, false);
    manager.start(record.id, caller).await.unwrap();

    let mut request = "ws://127.0.0.1:19302/".into_client_request().unwrap();
    request.headers_mut().insert(
        tokio_tungstenite::tungstenite::http::header::AUTHORIZATION,
        "Bearer wrong".parse().unwrap(),
    );
    let result = tokio_tungstenite::connect_async(request).await;
    assert!(result.is_err(), "handshake with a wrong bearer token must fail");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = manager.status(record.id).await.unwrap();
    assert_eq!(status.state, TunnelState::Active);
    assert_eq!(status.counters.bytes_in, 0);
    assert_eq!(status.counters.bytes_out, 0);

    manager.stop(record.id, caller).await.unwrap();
}

/// Scenario 3: a tcp-mux tunnel capped at 2 concurrent streams relays
/// the first two normally; a third stream gets no response because the
/// server silently drops frames for streams past the cap.
#[tokio::test]
async fn mux_stream_limit_rejects_third_concurrent_stream() {
    let manager = build_manager(10);
    let owner = OwnerId::new();
    let target_port = spawn_echo_server().await;

    let mut record = draft_record(owner, "t3", 19303, target_port);
    record.transport = Transport::TcpMux;
    record.mux = Some(MuxParams { streams: 2, ..MuxParams::default() });
    let record = manager.create(record).await.unwrap();
    let caller = Caller::new(owner, false);
    manager.start(record.id, caller).await.unwrap();

    let tcp = TcpStream::connect(("127.0.0.1", 19303u16)).await.unwrap();
    let client_mux = Multiplexer::new(Box::new(tcp), Role::Client, MuxParams { streams: 64, ..MuxParams::default() });

    let mut s1 = client_mux.open_stream().unwrap();
    let mut s2 = client_mux.open_stream().unwrap();
    let mut s3 = client_mux.open_stream().unwrap();

    s1.write_all(b"one").await.unwrap();
    s2.write_all(b"two").await.unwrap();
    s3.write_all(b"three").await.unwrap();

    let mut buf1 = [0u8; 3];
    tokio::time::timeout(Duration::from_secs(1), s1.read_exact(&mut buf1)).await.unwrap().unwrap();
    assert_eq!(&buf1, b"one");

    let mut buf2 = [0u8; 3];
    tokio::time::timeout(Duration::from_secs(1), s2.read_exact(&mut buf2)).await.unwrap().unwrap();
    assert_eq!(&buf2, b"two");

    let mut buf3 = [0u8; 5];
    let third = tokio::time::timeout(Duration::from_millis(300), s3.read_exact(&mut buf3)).await;
    assert!(third.is_err(), "a third concurrent stream must not be relayed once the cap is reached");

    manager.stop(record.id, caller).await.unwrap();
}

/// Scenario 4: stopping mid-transfer waits for the in-flight relay to
/// drain rather than truncating it, and the persisted counters reflect
/// the bytes the target actually received.
#[tokio::test]
async fn stop_drains_in_flight_transfer_within_grace_period() {
    let manager = build_manager(10);
    let owner = OwnerId::new();

    let sink = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = sink.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = sink.accept().await.unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match sock.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    });

    let record = manager.create(draft_record(owner, "t4", 19304, target_port)).await.unwrap();
    let caller = Caller::new(owner, false);
    manager.start(record.id, caller).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", 19304u16)).await.unwrap();
    const TRANSFER_SIZE: usize = 10 * 1024 * 1024;
    let payload = vec![0x42u8; TRANSFER_SIZE];
    let write_task = tokio::spawn(async move {
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();
    });

    // Give the transfer a moment to actually be in flight before stopping.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (write_result, stop_result) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(write_task, manager.stop(record.id, caller))
    })
    .await
    .expect("stop did not drain the in-flight transfer within the grace period");
    write_result.unwrap();
    stop_result.unwrap();

    let status = manager.status(record.id).await.unwrap();
    assert_eq!(status.state, TunnelState::Inactive);
    assert_eq!(status.counters.bytes_in, TRANSFER_SIZE as u64);
}

/// Scenario 5: quota enforcement rejects a third tunnel without
/// disturbing the two the owner already has.
#[tokio::test]
async fn quota_rejects_third_tunnel_without_affecting_existing_ones() {
    let manager = build_manager(2);
    let owner = OwnerId::new();

    let t1 = manager.create(draft_record(owner, "t1", 19305, 19401)).await.unwrap();
    let t2 = manager.create(draft_record(owner, "t2", 19306, 19402)).await.unwrap();
    let third = manager.create(draft_record(owner, "t3", 19307, 19403)).await;
    assert!(matches!(third, Err(ManagerError::QuotaExceeded)));

    assert_eq!(manager.status(t1.id).await.unwrap().state, TunnelState::Inactive);
    assert_eq!(manager.status(t2.id).await.unwrap().state, TunnelState::Inactive);
}

/// Scenario 6: a Push Bus subscriber observes `connecting`, `active`,
/// at least one `metrics-update`, then `inactive`, strictly in that
/// order.
#[tokio::test]
async fn push_bus_delivers_state_and_metrics_events_in_order() {
    let store = Arc::new(InMemoryTunnelStore::new());
    let registry = Arc::new(SessionRegistry::new());
    let push_bus = Arc::new(PushBus::new());
    let quota: Arc<dyn QuotaSource> =
        Arc::new(StaticQuotaSource::new(Quota { max_tunnels: 10, max_bandwidth: 0, max_connections: 0 }));
    let manager = TunnelManager::new(
        store.clone(),
        Arc::new(InMemoryCache::new()),
        registry.clone(),
        push_bus.clone(),
        quota,
        ManagerConfig::default(),
    );
    let metrics_config = MetricsConfig { sample_interval: Duration::from_millis(20), ..MetricsConfig::default() };
    let collector = MetricsCollector::new(registry, store, push_bus.clone(), metrics_config);
    let _sampling_task = collector.spawn_sampling_loop();

    let owner = OwnerId::new();
    let (client_side, server_side) = tokio::io::duplex(16 * 1024);
    push_bus.clone().register(owner, Box::new(server_side)).await;

    let target_port = spawn_idle_target().await;
    let record = manager.create(draft_record(owner, "t6", 19306, target_port)).await.unwrap();
    let caller = Caller::new(owner, false);

    manager.start(record.id, caller).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.stop(record.id, caller).await.unwrap();

    let mut reader = FramedRead::new(client_side, LengthDelimitedCodec::new());
    let mut events = Vec::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), reader.next())
            .await
            .expect("timed out waiting for a push event")
            .expect("subscriber stream ended early")
            .expect("frame error");
        let event: PushEvent = serde_json::from_slice(&frame).unwrap();
        let is_final = matches!(event, PushEvent::StateChanged { state: TunnelState::Inactive, .. });
        events.push(event);
        if is_final {
            break;
        }
    }

    assert!(matches!(events[0], PushEvent::StateChanged { state: TunnelState::Connecting, .. }));
    assert!(matches!(events[1], PushEvent::StateChanged { state: TunnelState::Active, .. }));
    let metrics_between = events[2..events.len() - 1].iter().filter(|e| matches!(e, PushEvent::MetricsUpdate(_))).count();
    assert!(metrics_between >= 1, "expected at least one metrics-update between active and inactive");
    assert!(matches!(events.last().unwrap(), PushEvent::StateChanged { state: TunnelState::Inactive, .. }));
}
