//! A single logical stream multiplexed over the shared transport duplex.
//! Presented as a [`relaycore_transport::Duplex`] so the Relay can treat
//! it exactly like a raw accepted connection.

use crate::window::{RecvWindow, SendWindow};
use bytes::{Bytes, BytesMut};
use relaycore_proto::{Frame, StreamId};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

pub(crate) struct StreamEntry {
    pub inbound_tx: mpsc::UnboundedSender<Bytes>,
    pub send_window: Arc<SendWindow>,
    pub recv_window: Arc<RecvWindow>,
}

pub(crate) type StreamMap = Arc<StdMutex<HashMap<StreamId, StreamEntry>>>;

type WindowFut = Pin<Box<dyn Future<Output = u32> + Send>>;

/// One end of a multiplexed stream. Reads deliver payload bytes from
/// `Data` frames in order; writes are chunked to the peer's advertised
/// window and trigger `WindowUpdate` frames as the local buffer drains.
pub struct MuxStream {
    stream_id: StreamId,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    read_leftover: BytesMut,
    outbound: mpsc::UnboundedSender<Frame>,
    send_window: Arc<SendWindow>,
    recv_window: Arc<RecvWindow>,
    streams: StreamMap,
    write_closed: bool,
    write_fut: Option<WindowFut>,
    eof_seen: bool,
}

impl MuxStream {
    pub(crate) fn new(
        stream_id: StreamId,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        outbound: mpsc::UnboundedSender<Frame>,
        send_window: Arc<SendWindow>,
        recv_window: Arc<RecvWindow>,
        streams: StreamMap,
    ) -> Self {
        Self {
            stream_id,
            inbound,
            read_leftover: BytesMut::new(),
            outbound,
            send_window,
            recv_window,
            streams,
            write_closed: false,
            write_fut: None,
            eof_seen: false,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.as_mut().get_mut();

        if !this.read_leftover.is_empty() {
            let n = this.read_leftover.len().min(buf.remaining());
            buf.put_slice(&this.read_leftover[..n]);
            let _ = this.read_leftover.split_to(n);
            this.note_consumed(n as u32);
            return Poll::Ready(Ok(()));
        }

        if this.eof_seen {
            return Poll::Ready(Ok(()));
        }

        match this.inbound.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    this.read_leftover.extend_from_slice(&chunk[n..]);
                }
                this.note_consumed(n as u32);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => {
                this.eof_seen = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl MuxStream {
    fn note_consumed(&self, n: u32) {
        if n == 0 {
            return;
        }
        if let Some(amount) = self.recv_window.on_consumed(n) {
            let _ = self.outbound.send(Frame::window_update(self.stream_id, amount));
        }
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.as_mut().get_mut();
        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream write half closed")));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            if this.write_fut.is_none() {
                let window = this.send_window.clone();
                let want = buf.len().min(u32::MAX as usize) as u32;
                this.write_fut = Some(Box::pin(async move { window.reserve(want).await }));
            }
            let fut = this.write_fut.as_mut().unwrap();
            match fut.as_mut().poll(cx) {
                Poll::Ready(grant) => {
                    this.write_fut = None;
                    let n = (grant as usize).min(buf.len());
                    if n == 0 {
                        continue;
                    }
                    let frame = Frame::data(this.stream_id, Bytes::copy_from_slice(&buf[..n]));
                    if this.outbound.send(frame).is_err() {
                        return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "multiplexer shut down")));
                    }
                    return Poll::Ready(Ok(n));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.as_mut().get_mut();
        if !this.write_closed {
            this.write_closed = true;
            let _ = this.outbound.send(Frame::fin(this.stream_id));
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        if !self.write_closed {
            let _ = self.outbound.send(Frame::fin(self.stream_id));
        }
        self.streams.lock().unwrap().remove(&self.stream_id);
    }
}
