//! Relay (C3): dials a target, copies bytes in both directions, and
//! accounts every byte into the tunnel's live counters (spec §4.3).

use crate::error::{RelayError, RelayResult};
use relaycore_model::AtomicCounters;
use relaycore_transport::Duplex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Spec §4.3 step 1: "Dials `T` with a 10-second connect deadline."
pub const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Relays `inbound` (a stream accepted from a mux or raw transport
/// acceptor) to `target`, accounting bytes into `counters`. Returns once
/// both directions have finished (EOF, error, or cancellation upstream).
pub async fn relay<I>(inbound: I, target: SocketAddr, counters: Arc<AtomicCounters>) -> RelayResult<()>
where
    I: Duplex,
{
    let target_stream = tokio::time::timeout(CONNECT_DEADLINE, TcpStream::connect(target))
        .await
        .map_err(|_| RelayError::DialTimeout)?
        .map_err(RelayError::DialFailed)?;
    counters.inc_connections();

    let (inbound_r, inbound_w) = tokio::io::split(inbound);
    let (target_r, target_w) = tokio::io::split(target_stream);

    // I -> T is what the client sent us: counted as bytes_in.
    let to_target = tokio::spawn(copy_counted(inbound_r, target_w, counters.clone(), CountAs::BytesIn));
    // T -> I is what we hand back to the client: counted as bytes_out.
    let to_inbound = tokio::spawn(copy_counted(target_r, inbound_w, counters.clone(), CountAs::BytesOut));

    let (a, b) = tokio::join!(to_target, to_inbound);
    if let Err(e) = a {
        debug!(error = %e, "inbound->target copy task panicked");
    }
    if let Err(e) = b {
        debug!(error = %e, "target->inbound copy task panicked");
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum CountAs {
    BytesIn,
    BytesOut,
}

/// Copies `reader` into `writer` until EOF or error, then half-closes
/// `writer` so the peer sees the direction has finished draining while
/// the other direction may still be active (spec §4.3 half-close policy).
async fn copy_counted<R, W>(mut reader: R, mut writer: W, counters: Arc<AtomicCounters>, count_as: CountAs)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "relay copy read error");
                break;
            }
        };
        match count_as {
            CountAs::BytesIn => counters.add_bytes_in(n as u64),
            CountAs::BytesOut => counters.add_bytes_out(n as u64),
        }
        if writer.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn relays_bytes_and_updates_counters() {
        let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = echo_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = echo_listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            loop {
                let n = match tokio::io::AsyncReadExt::read(&mut sock, &mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if sock.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });

        let (mut client_side, inbound) = tokio::io::duplex(4096);
        let counters = Arc::new(AtomicCounters::new());
        let relay_counters = counters.clone();
        let relay_task = tokio::spawn(async move { relay(inbound, target_addr, relay_counters).await });

        client_side.write_all(b"round-trip").await.unwrap();
        let mut echoed = [0u8; 10];
        tokio::io::AsyncReadExt::read_exact(&mut client_side, &mut echoed).await.unwrap();
        assert_eq!(&echoed, b"round-trip");

        client_side.shutdown().await.unwrap();
        relay_task.await.unwrap().unwrap();

        let snap = counters.snapshot();
        assert_eq!(snap.bytes_in, 10);
        assert_eq!(snap.bytes_out, 10);
        assert_eq!(snap.connection_count, 1);
    }

    #[tokio::test]
    async fn dial_failure_returns_error() {
        let (_client_side, inbound) = tokio::io::duplex(4096);
        let unroutable: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let counters = Arc::new(AtomicCounters::new());
        let result = tokio::time::timeout(Duration::from_secs(2), relay(inbound, unroutable, counters)).await.unwrap();
        assert!(result.is_err());
    }
}
