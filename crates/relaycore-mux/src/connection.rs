//! The multiplexer connection itself: reader, writer and keepalive tasks
//! driving a single transport duplex, plus the `accept-stream` /
//! `open-stream` contract exposed to callers (spec §4.2).

use crate::error::{MuxError, MuxResult};
use crate::stream::{MuxStream, StreamEntry, StreamMap};
use crate::window::{RecvWindow, SendWindow};
use bytes::{Bytes, BytesMut};
use relaycore_model::MuxParams;
use relaycore_proto::{Frame, FrameFlags, FrameType, StreamId, CONTROL_STREAM_ID};
use relaycore_transport::BoxedDuplex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which side allocates odd vs. even stream ids, so both ends can open
/// streams without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

const KEEPALIVE_MISS_LIMIT: u32 = 3;
const ACCEPT_QUEUE_DEPTH: usize = 128;

/// A multiplexed connection. Cheap to clone (internals are `Arc`-shared);
/// dropping every clone tears down the background tasks.
#[derive(Clone)]
pub struct Multiplexer(Arc<Inner>);

struct Inner {
    outbound_tx: mpsc::UnboundedSender<Frame>,
    streams: StreamMap,
    accept_rx: AsyncMutex<mpsc::Receiver<MuxStream>>,
    next_id: AtomicU64,
    go_away_sent: AtomicBool,
    go_away_received: AtomicBool,
    max_streams: u16,
    receive_buffer: u32,
    cancel: CancellationToken,
    keepalive_misses: AtomicU32,
}

impl Multiplexer {
    /// Spawns the reader, writer and keepalive tasks over `duplex` and
    /// returns a handle exposing `accept_stream`/`open_stream`.
    pub fn new(duplex: BoxedDuplex, role: Role, params: MuxParams) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let streams: StreamMap = Arc::new(StdMutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let first_id: u64 = match role {
            Role::Client => 1,
            Role::Server => 2,
        };

        let inner = Arc::new(Inner {
            outbound_tx: outbound_tx.clone(),
            streams: streams.clone(),
            accept_rx: AsyncMutex::new(accept_rx),
            next_id: AtomicU64::new(first_id),
            go_away_sent: AtomicBool::new(false),
            go_away_received: AtomicBool::new(false),
            max_streams: params.streams,
            receive_buffer: params.receive_buffer,
            cancel: cancel.clone(),
            keepalive_misses: AtomicU32::new(0),
        });

        let (read_half, write_half) = tokio::io::split(duplex);

        tokio::spawn(writer_task(write_half, outbound_rx, cancel.clone()));
        tokio::spawn(reader_task(
            read_half,
            streams.clone(),
            accept_tx,
            outbound_tx.clone(),
            inner.clone(),
            cancel.clone(),
        ));
        tokio::spawn(keepalive_task(
            outbound_tx,
            inner.clone(),
            std::time::Duration::from_secs(params.keepalive_period_secs as u64),
            cancel.clone(),
        ));

        Multiplexer(inner)
    }

    /// Blocks until the peer opens a new stream, `go-away` drains this
    /// side, or the transport is lost.
    pub async fn accept_stream(&self) -> MuxResult<MuxStream> {
        let mut rx = self.0.accept_rx.lock().await;
        tokio::select! {
            biased;
            _ = self.0.cancel.cancelled() => Err(MuxError::Cancelled),
            stream = rx.recv() => stream.ok_or(MuxError::TransportClosed),
        }
    }

    /// Opens a new locally-initiated stream. Fails immediately if the
    /// concurrent stream cap is reached or a `go-away` is in effect.
    pub fn open_stream(&self) -> MuxResult<MuxStream> {
        if self.0.go_away_sent.load(Ordering::SeqCst) || self.0.go_away_received.load(Ordering::SeqCst) {
            return Err(MuxError::GoingAway);
        }
        let mut streams = self.0.streams.lock().unwrap();
        if streams.len() >= self.0.max_streams as usize {
            return Err(MuxError::StreamLimitReached);
        }
        let id = self.0.next_id.fetch_add(2, Ordering::SeqCst) as StreamId;
        let (stream, entry) = self.build_stream(id);
        streams.insert(id, entry);
        Ok(stream)
    }

    fn build_stream(&self, id: StreamId) -> (MuxStream, StreamEntry) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let send_window = Arc::new(SendWindow::new(self.0.receive_buffer));
        let recv_window = Arc::new(RecvWindow::new(self.0.receive_buffer));
        let stream = MuxStream::new(
            id,
            inbound_rx,
            self.0.outbound_tx.clone(),
            send_window.clone(),
            recv_window.clone(),
            self.0.streams.clone(),
        );
        (stream, StreamEntry { inbound_tx, send_window, recv_window })
    }

    /// Sends `go-away`: no new streams may be opened locally or accepted
    /// from the peer, but in-flight streams are allowed to drain.
    pub fn go_away(&self) {
        if !self.0.go_away_sent.swap(true, Ordering::SeqCst) {
            let _ = self.0.outbound_tx.send(Frame::go_away());
        }
    }

    pub fn active_streams(&self) -> usize {
        self.0.streams.lock().unwrap().len()
    }

    pub fn shutdown(&self) {
        self.0.cancel.cancel();
    }
}

async fn writer_task<W>(mut write_half: W, mut outbound_rx: mpsc::UnboundedReceiver<Frame>, cancel: CancellationToken)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { return };
                match frame.encode() {
                    Ok(bytes) => {
                        if write_half.write_all(&bytes).await.is_err() {
                            cancel.cancel();
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping unencodable frame"),
                }
            }
        }
    }
}

async fn reader_task<R>(
    mut read_half: R,
    streams: StreamMap,
    accept_tx: mpsc::Sender<MuxStream>,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    inner: Arc<Inner>,
    cancel: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(64 * 1024);
    let mut read_buf = [0u8; 16 * 1024];

    'outer: loop {
        loop {
            match Frame::decode_from_buf(&mut buf) {
                Ok(Some(frame)) => {
                    if handle_frame(frame, &streams, &accept_tx, &outbound_tx, &inner).await.is_err() {
                        cancel.cancel();
                        break 'outer;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "malformed mux frame, closing transport");
                    cancel.cancel();
                    break 'outer;
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'outer,
            result = read_half.read(&mut read_buf) => {
                match result {
                    Ok(0) | Err(_) => {
                        cancel.cancel();
                        break 'outer;
                    }
                    Ok(n) => buf.extend_from_slice(&read_buf[..n]),
                }
            }
        }
    }

    // Unblock anyone waiting on accept_stream() and drop all live streams.
    drop(accept_tx);
    streams.lock().unwrap().clear();
}

async fn handle_frame(
    frame: Frame,
    streams: &StreamMap,
    accept_tx: &mpsc::Sender<MuxStream>,
    outbound_tx: &mpsc::UnboundedSender<Frame>,
    inner: &Arc<Inner>,
) -> Result<(), ()> {
    if frame.stream_id == CONTROL_STREAM_ID {
        match frame.frame_type {
            FrameType::Ping => {
                if frame.flags.has_ack() {
                    inner.keepalive_misses.store(0, Ordering::SeqCst);
                } else {
                    let _ = outbound_tx.send(Frame::new(CONTROL_STREAM_ID, FrameType::Ping, Bytes::new()).with_flags(FrameFlags::new().with_ack()));
                }
            }
            FrameType::GoAway => {
                inner.go_away_received.store(true, Ordering::SeqCst);
                debug!("peer sent go-away");
            }
            _ => warn!(frame_type = ?frame.frame_type, "unexpected control-stream frame"),
        }
        return Ok(());
    }

    match frame.frame_type {
        FrameType::Data => {
            let existing = streams.lock().unwrap().get(&frame.stream_id).map(|e| e.inbound_tx.clone());
            let sender = match existing {
                Some(tx) => Some(tx),
                None => {
                    if inner.go_away_received.load(Ordering::SeqCst) || inner.go_away_sent.load(Ordering::SeqCst) {
                        None
                    } else {
                        let mut guard = streams.lock().unwrap();
                        if guard.len() >= inner.max_streams as usize {
                            warn!(stream_id = frame.stream_id, "inbound stream rejected: concurrency cap reached");
                            None
                        } else {
                            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                            let send_window = Arc::new(SendWindow::new(inner.receive_buffer));
                            let recv_window = Arc::new(RecvWindow::new(inner.receive_buffer));
                            let mux_stream = MuxStream::new(
                                frame.stream_id,
                                inbound_rx,
                                outbound_tx.clone(),
                                send_window.clone(),
                                recv_window.clone(),
                                streams.clone(),
                            );
                            guard.insert(frame.stream_id, StreamEntry { inbound_tx: inbound_tx.clone(), send_window, recv_window });
                            drop(guard);
                            if accept_tx.try_send(mux_stream).is_err() {
                                warn!(stream_id = frame.stream_id, "accept queue full, dropping new stream");
                                streams.lock().unwrap().remove(&frame.stream_id);
                                None
                            } else {
                                Some(inbound_tx)
                            }
                        }
                    }
                }
            };
            if let Some(tx) = sender {
                let _ = tx.send(frame.payload);
            }
        }
        FrameType::WindowUpdate => {
            if frame.payload.len() == 4 {
                let amount = u32::from_be_bytes([frame.payload[0], frame.payload[1], frame.payload[2], frame.payload[3]]);
                if let Some(entry) = streams.lock().unwrap().get(&frame.stream_id) {
                    entry.send_window.replenish(amount);
                }
            }
        }
        FrameType::Fin => {
            // Drop the inbound sender so the stream's reader observes EOF;
            // the write half may still be open for half-close.
            streams.lock().unwrap().remove(&frame.stream_id);
        }
        FrameType::Ping | FrameType::GoAway => {
            warn!(frame_type = ?frame.frame_type, "control frame on non-zero stream, ignoring");
        }
    }
    Ok(())
}

async fn keepalive_task(
    outbound_tx: mpsc::UnboundedSender<Frame>,
    inner: Arc<Inner>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                let misses = inner.keepalive_misses.fetch_add(1, Ordering::SeqCst) + 1;
                if misses > KEEPALIVE_MISS_LIMIT {
                    warn!("keepalive exceeded {} missed periods, closing transport", KEEPALIVE_MISS_LIMIT);
                    cancel.cancel();
                    return;
                }
                if outbound_tx.send(Frame::ping()).is_err() {
                    return;
                }
            }
        }
    }
}
