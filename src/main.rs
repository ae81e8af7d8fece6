//! Composition root for a standalone tunnel: wires the persistence store,
//! cache, session registry, push bus, quota source and metrics collector
//! into a `TunnelManager`, then drives one tunnel's full lifecycle from
//! the CLI flags a human or a launching process supplies (spec §6
//! "Operator CLI flags").

use clap::{Parser, ValueEnum};
use relaycore_cache::InMemoryCache;
use relaycore_manager::{Caller, ManagerConfig, ManagerError, QuotaSource, StaticQuotaSource, TunnelManager};
use relaycore_metrics::{MetricsCollector, MetricsConfig};
use relaycore_model::{Endpoint, MuxParams, OwnerId, Quota, TlsParams, TlsVersion, Transport, TunnelRecord, TunnelState};
use relaycore_pushbus::PushBus;
use relaycore_registry::SessionRegistry;
use relaycore_store::InMemoryTunnelStore;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_BIND_FAILURE: u8 = 3;
const EXIT_RUNTIME_FATAL: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "relaycore")]
#[command(about = "Managed tunnel data-plane: standalone launcher")]
#[command(version)]
struct Cli {
    /// `server` runs the data-plane described by the remaining flags.
    /// `client` is declared by the source this was distilled from but
    /// never implemented there; it is out of scope here too.
    #[arg(long, value_enum, default_value = "server")]
    mode: Mode,

    #[arg(long, value_enum, env = "RELAYCORE_PROTOCOL")]
    protocol: Protocol,

    /// HOST:PORT to accept client connections on.
    #[arg(long, env = "RELAYCORE_LISTEN")]
    listen: String,

    /// HOST:PORT to relay each accepted connection/stream to.
    #[arg(long, env = "RELAYCORE_TARGET")]
    target: String,

    /// Shared secret required of the remote side (>= 16 printable bytes).
    #[arg(long, env = "RELAYCORE_TOKEN")]
    token: String,

    /// TLS certificate path, required when protocol=wss.
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key path, required when protocol=wss.
    #[arg(long)]
    key: Option<String>,

    /// Layer a stream multiplexer over the chosen transport (tcp/ws/wss only).
    #[arg(long, value_enum, default_value = "off")]
    mux: OnOff,

    /// Concurrent logical streams permitted per multiplexed connection.
    #[arg(long, default_value_t = 8)]
    mux_streams: u16,

    /// Optional name for the tunnel record; auto-generated if omitted.
    #[arg(long)]
    name: Option<String>,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Server,
    Client,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Protocol {
    Tcp,
    Udp,
    Ws,
    Wss,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OnOff {
    On,
    Off,
}

fn setup_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn parse_endpoint(flag: &str, raw: &str) -> Result<(Endpoint, SocketAddr), String> {
    let addr: SocketAddr = raw.parse().map_err(|e| format!("{flag} must be HOST:PORT: {e}"))?;
    let endpoint = Endpoint { host: addr.ip().to_string(), port: addr.port() };
    Ok((endpoint, addr))
}

/// Resolves the CLI's protocol+mux flags into a transport variant and its
/// optional mux/tls parameters (spec §6: "mux={on|off}").
fn resolve_transport(cli: &Cli) -> Result<(Transport, Option<MuxParams>, Option<TlsParams>), String> {
    let mux_requested = cli.mux == OnOff::On;
    if mux_requested && cli.protocol == Protocol::Udp {
        return Err("mux is not supported over udp".to_string());
    }

    let transport = match (cli.protocol, mux_requested) {
        (Protocol::Tcp, false) => Transport::Tcp,
        (Protocol::Tcp, true) => Transport::TcpMux,
        (Protocol::Udp, _) => Transport::Udp,
        (Protocol::Ws, false) => Transport::Ws,
        (Protocol::Ws, true) => Transport::WsMux,
        (Protocol::Wss, false) => Transport::Wss,
        (Protocol::Wss, true) => Transport::WssMux,
    };

    let mux = mux_requested.then(|| MuxParams { streams: cli.mux_streams, ..MuxParams::default() });

    let tls = if transport.requires_tls() {
        let cert_path = cli.cert.clone().ok_or("cert is required for wss")?;
        let key_path = cli.key.clone().ok_or("key is required for wss")?;
        Some(TlsParams { cert_path, key_path, min_version: TlsVersion::Tls12, max_version: TlsVersion::Tls13 })
    } else {
        None
    };

    Ok((transport, mux, tls))
}

fn error_exit_code(e: &ManagerError) -> u8 {
    use relaycore_model::ErrorKind;
    match e.kind() {
        ErrorKind::BindFailed => EXIT_BIND_FAILURE,
        ErrorKind::Internal | ErrorKind::PersistentIo | ErrorKind::TransientIo => EXIT_RUNTIME_FATAL,
        _ => EXIT_CONFIG_ERROR,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.debug);

    if cli.mode == Mode::Client {
        error!("client mode is not implemented");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let (listen, _listen_addr) = match parse_endpoint("listen", &cli.listen) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let (target, _target_addr) = match parse_endpoint("target", &cli.target) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let (transport, mux, tls) = match resolve_transport(&cli) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let owner = OwnerId::new();
    let name = cli.name.clone().unwrap_or_else(|| format!("cli-{}", listen.port));
    let now = chrono::Utc::now();
    let record = TunnelRecord {
        id: relaycore_model::TunnelId::new(),
        owner,
        name,
        transport,
        listen,
        target,
        token: cli.token.clone(),
        mux,
        tls,
        state: TunnelState::Inactive,
        counters: Default::default(),
        created_at: now,
        updated_at: now,
        last_seen: None,
        deleted_at: None,
    };

    // Cyclic construction per spec §9: persistence/cache first, then the
    // push bus, then the collector (borrowing the bus), then the manager
    // (borrowing all three) — nothing holds a strong reference to its
    // container.
    let store = Arc::new(InMemoryTunnelStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let registry = Arc::new(SessionRegistry::new());
    let push_bus = Arc::new(PushBus::new());
    let quota_source: Arc<dyn QuotaSource> =
        Arc::new(StaticQuotaSource::new(Quota { max_tunnels: 1, max_bandwidth: 0, max_connections: 0 }));
    let manager = TunnelManager::new(
        store.clone(),
        cache.clone(),
        registry.clone(),
        push_bus.clone(),
        quota_source,
        ManagerConfig::default(),
    );
    let collector = MetricsCollector::new(registry.clone(), store.clone(), push_bus.clone(), MetricsConfig::default());
    let _sampling_task = collector.clone().spawn_sampling_loop();
    let _retention_task = collector.spawn_retention_loop();

    let record = match manager.create(record).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to register tunnel");
            return ExitCode::from(error_exit_code(&e));
        }
    };

    let caller = Caller::new(owner, true);
    info!(tunnel_id = %record.id, %record.name, "starting tunnel");
    if let Err(e) = manager.start(record.id, caller).await {
        error!(error = %e, "failed to start tunnel");
        return ExitCode::from(error_exit_code(&e));
    }
    info!(tunnel_id = %record.id, "tunnel active, press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut health_check = tokio::time::interval(Duration::from_millis(500));

    let exit_code = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("received interrupt, stopping tunnel");
                break EXIT_OK;
            }
            _ = health_check.tick() => {
                match manager.status(record.id).await {
                    Ok(status) if status.state == TunnelState::Error => {
                        error!(tunnel_id = %record.id, "tunnel entered error state, stopping");
                        break EXIT_RUNTIME_FATAL;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "status check failed");
                        continue;
                    }
                }
            }
        }
    };

    if manager.status(record.id).await.map(|s| s.state.requires_live_instance()).unwrap_or(false) {
        if let Err(e) = manager.stop(record.id, caller).await {
            warn!(error = %e, "stop failed during shutdown");
        }
    }

    info!("relaycore stopped");
    ExitCode::from(exit_code)
}
