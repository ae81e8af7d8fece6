//! Presents an upgraded WebSocket connection as a [`Duplex`] (spec §4.1:
//! "message boundaries are preserved as frames (binary frames only)").

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::warn;

/// A single upstream-client connection presented as a byte duplex. Reads
/// yield the payload of `Binary` frames in order; writes are each sent as
/// one `Binary` frame (message boundaries are not otherwise meaningful to
/// callers, which only ever read/write raw bytes).
pub struct WsDuplex {
    inbound: mpsc::UnboundedReceiver<Bytes>,
    read_leftover: BytesMut,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    eof: bool,
    shutdown_sent: bool,
}

/// Spawns the reader/writer pump over `ws` and returns the duplex handle.
/// Mirrors the split-task shape used by the transport acceptors and the
/// multiplexer: one task per direction, connected by channels.
pub fn spawn_duplex<S>(ws: WebSocketStream<S>) -> WsDuplex
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (mut sink, mut stream) = ws.split();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(bytes) if bytes.is_empty() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        Some(bytes) => {
                            if sink.send(Message::Binary(bytes)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(data))) => {
                            if inbound_tx.send(Bytes::from(data)).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read error");
                            break;
                        }
                    }
                }
            }
        }
    });

    WsDuplex { inbound: inbound_rx, read_leftover: BytesMut::new(), outbound: outbound_tx, eof: false, shutdown_sent: false }
}

impl AsyncRead for WsDuplex {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.as_mut().get_mut();

        if !this.read_leftover.is_empty() {
            let n = this.read_leftover.len().min(buf.remaining());
            buf.put_slice(&this.read_leftover[..n]);
            let _ = this.read_leftover.split_to(n);
            return Poll::Ready(Ok(()));
        }

        if this.eof {
            return Poll::Ready(Ok(()));
        }

        match this.inbound.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    this.read_leftover.extend_from_slice(&chunk[n..]);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => {
                this.eof = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for WsDuplex {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if self.outbound.send(buf.to_vec()).is_err() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "websocket connection closed")));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.as_mut().get_mut();
        if !this.shutdown_sent {
            this.shutdown_sent = true;
            // An empty payload is never produced by a real write (poll_write
            // short-circuits on an empty buf), so it unambiguously signals
            // the pump task to send a Close frame and exit.
            let _ = this.outbound.send(Vec::new());
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::protocol::Role;

    #[tokio::test]
    async fn round_trips_binary_payload_over_loopback() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        let mut client = spawn_duplex(client_ws);
        let mut server = spawn_duplex(server_ws);

        client.write_all(b"ping-payload").await.unwrap();
        client.flush().await.unwrap();

        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping-payload");
    }
}
