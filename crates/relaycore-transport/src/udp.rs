//! UDP passthrough (spec §4.1): a single public socket multiplexes many
//! client sources onto per-source upstream sockets dialed to the target.

use relaycore_model::AtomicCounters;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};

/// Datagrams larger than this are dropped (spec §4.1 / §8).
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Per-source entries idle longer than this are torn down (spec §4.1/§5).
pub const SOURCE_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct UpstreamEntry {
    socket: Arc<UdpSocket>,
    last_active: Instant,
}

/// Runs the UDP passthrough loop until `cancel` fires. Each client source
/// gets its own upstream socket dialed to `target`; replies are forwarded
/// back to the originating client address.
pub struct UdpForwarder {
    public: UdpSocket,
    target: SocketAddr,
    counters: Arc<AtomicCounters>,
    cancel: CancellationToken,
}

impl UdpForwarder {
    pub async fn bind(listen: SocketAddr, target: SocketAddr, counters: Arc<AtomicCounters>) -> TransportResult<Self> {
        let public = UdpSocket::bind(listen).await.map_err(|e| TransportError::BindError {
            address: listen.ip().to_string(),
            port: listen.port(),
            reason: e.to_string(),
        })?;
        Ok(Self { public, target, counters, cancel: CancellationToken::new() })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.public.local_addr().map_err(TransportError::Io)
    }

    /// Runs until cancelled. Intended to be spawned as its own task.
    pub async fn run(self) -> TransportResult<()> {
        let public = Arc::new(self.public);
        let upstreams: Arc<Mutex<HashMap<SocketAddr, UpstreamEntry>>> = Arc::new(Mutex::new(HashMap::new()));

        let reaper = {
            let upstreams = upstreams.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tick.tick() => {
                            let mut map = upstreams.lock().await;
                            map.retain(|addr, entry| {
                                let alive = entry.last_active.elapsed() < SOURCE_IDLE_TIMEOUT;
                                if !alive {
                                    debug!(%addr, "UDP source idle, closing upstream");
                                }
                                alive
                            });
                        }
                    }
                }
            })
        };

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                recv = public.recv_from(&mut buf) => {
                    match recv {
                        Ok((n, from)) => {
                            if n > MAX_DATAGRAM_SIZE {
                                warn!(len = n, "oversized UDP datagram dropped");
                                continue;
                            }
                            self.counters.add_bytes_in(n as u64);
                            self.forward_to_target(&upstreams, &public, from, &buf[..n]).await;
                        }
                        Err(e) => break Err(TransportError::Io(e)),
                    }
                }
            }
        };

        reaper.abort();
        result
    }

    async fn forward_to_target(
        &self,
        upstreams: &Arc<Mutex<HashMap<SocketAddr, UpstreamEntry>>>,
        public: &Arc<UdpSocket>,
        from: SocketAddr,
        data: &[u8],
    ) {
        let mut map = upstreams.lock().await;
        let is_new = !map.contains_key(&from);
        let entry = if is_new {
            match self.dial_upstream(from, public, upstreams.clone()).await {
                Ok(socket) => {
                    self.counters.inc_connections();
                    map.entry(from).or_insert_with(|| UpstreamEntry { socket, last_active: Instant::now() })
                }
                Err(e) => {
                    warn!(error = %e, %from, "failed to dial target for new UDP source");
                    return;
                }
            }
        } else {
            map.get_mut(&from).expect("checked contains_key above")
        };

        entry.last_active = Instant::now();
        if let Err(e) = entry.socket.send(data).await {
            warn!(error = %e, "failed to forward UDP datagram to target");
        } else {
            self.counters.add_bytes_out(data.len() as u64);
        }
    }

    async fn dial_upstream(
        &self,
        from: SocketAddr,
        public: &Arc<UdpSocket>,
        upstreams: Arc<Mutex<HashMap<SocketAddr, UpstreamEntry>>>,
    ) -> TransportResult<Arc<UdpSocket>> {
        let bind_addr: SocketAddr = if self.target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
        let socket = UdpSocket::bind(bind_addr).await.map_err(TransportError::Io)?;
        socket.connect(self.target).await.map_err(TransportError::Io)?;
        let socket = Arc::new(socket);

        let reader_socket = socket.clone();
        let public = public.clone();
        let counters = self.counters.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
            loop {
                match reader_socket.recv(&mut buf).await {
                    Ok(n) => {
                        counters.add_bytes_out(n as u64);
                        if let Err(e) = public.send_to(&buf[..n], from).await {
                            warn!(error = %e, "failed to send UDP reply to client");
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, %from, "UDP upstream reader ended");
                        break;
                    }
                }
                if !upstreams.lock().await.contains_key(&from) {
                    break;
                }
            }
        });

        Ok(socket)
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::net::UdpSocket as TestSocket;

    #[tokio::test]
    async fn forwards_datagram_round_trip() {
        let echo = TestSocket::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                let (n, from) = match echo.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let _ = echo.send_to(&buf[..n], from).await;
            }
        });

        let counters = Arc::new(AtomicCounters::new());
        let forwarder = UdpForwarder::bind("127.0.0.1:0".parse().unwrap(), echo_addr, counters.clone())
            .await
            .unwrap();
        let listen_addr = forwarder.local_addr().unwrap();
        let cancel = forwarder.cancellation_token();
        let handle = tokio::spawn(forwarder.run());

        let client = TestSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"PING", listen_addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"PING");

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(counters.bytes_in.load(Ordering::Relaxed) >= 4);
    }
}
