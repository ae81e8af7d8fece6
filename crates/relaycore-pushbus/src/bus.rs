//! Push Bus (C7): `register`/`unregister`, `to_owner`/`to_all` fan-out,
//! bounded per-subscriber channel with drop-on-full, and idle-subscriber
//! heartbeat reaping (spec §4.7).

use crate::event::{InboundMessage, PushEvent};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use relaycore_model::OwnerId;
use relaycore_transport::BoxedDuplex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::split;
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};

/// Per-subscriber bounded send buffer (spec §4.7: "suggested 256 messages").
pub const SUBSCRIBER_CHANNEL_DEPTH: usize = 256;
/// Idle-subscriber probe period (spec §4.7: "every 54 seconds").
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(54);
const HEARTBEAT_MISS_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    owner: OwnerId,
    tx: mpsc::Sender<PushEvent>,
}

#[derive(Default)]
pub struct PushBus {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl PushBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a subscriber connection to an owner (authenticated by the
    /// caller before this is invoked) and starts its pump task. Callers
    /// hold the bus behind an `Arc` so the pump task can share ownership
    /// of the subscriber table instead of borrowing from `self`.
    pub async fn register(self: Arc<Self>, owner: OwnerId, duplex: BoxedDuplex) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_DEPTH);
        self.subscribers.write().await.insert(id, Subscriber { owner, tx });

        tokio::spawn(run_subscriber(id, duplex, rx, self));

        SubscriptionHandle(id)
    }

    pub async fn unregister(&self, handle: SubscriptionHandle) {
        self.subscribers.write().await.remove(&handle.0);
    }

    pub async fn to_owner(&self, owner: OwnerId, event: PushEvent) {
        self.broadcast(event, Some(owner)).await;
    }

    pub async fn to_all(&self, event: PushEvent) {
        self.broadcast(event, None).await;
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn broadcast(&self, event: PushEvent, owner: Option<OwnerId>) {
        let mut full = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sub) in subscribers.iter() {
                if owner.is_some_and(|o| o != sub.owner) {
                    continue;
                }
                if sub.tx.try_send(event.clone()).is_err() {
                    full.push(*id);
                }
            }
        }
        if !full.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in full {
                debug!(subscriber = id, "dropping subscriber: send buffer full or closed");
                subscribers.remove(&id);
            }
        }
    }
}

async fn run_subscriber(
    id: u64,
    duplex: BoxedDuplex,
    mut rx: mpsc::Receiver<PushEvent>,
    bus: Arc<PushBus>,
) {
    let (reader, writer) = split(duplex);
    let mut framed_read = FramedRead::new(reader, LengthDelimitedCodec::new());
    let mut framed_write = FramedWrite::new(writer, LengthDelimitedCodec::new());
    let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut misses = 0u32;

    loop {
        tokio::select! {
            biased;

            event = rx.recv() => {
                match event {
                    None => {
                        debug!(subscriber = id, "subscriber channel closed");
                        break;
                    }
                    Some(event) => {
                        if !send_event(&mut framed_write, &event).await {
                            break;
                        }
                    }
                }
            }

            _ = heartbeat.tick() => {
                if misses >= HEARTBEAT_MISS_LIMIT {
                    warn!(subscriber = id, "dropping subscriber: missed {} heartbeats", misses);
                    break;
                }
                misses += 1;
                if !send_event(&mut framed_write, &PushEvent::Heartbeat).await {
                    break;
                }
            }

            incoming = framed_read.next() => {
                match incoming {
                    Some(Ok(frame)) => match serde_json::from_slice::<InboundMessage>(&frame) {
                        Ok(InboundMessage::Ping) => misses = 0,
                        Ok(InboundMessage::Unsubscribe) => {
                            debug!(subscriber = id, "subscriber requested unsubscribe");
                            break;
                        }
                        Ok(InboundMessage::Subscribe) => {
                            debug!(subscriber = id, "redundant subscribe message ignored");
                        }
                        Err(e) => warn!(subscriber = id, error = %e, "ignoring unrecognized inbound message"),
                    },
                    Some(Err(e)) => {
                        warn!(subscriber = id, error = %e, "subscriber connection error");
                        break;
                    }
                    None => {
                        debug!(subscriber = id, "subscriber connection closed by peer");
                        break;
                    }
                }
            }
        }
    }

    bus.subscribers.write().await.remove(&id);
}

async fn send_event(
    framed_write: &mut FramedWrite<tokio::io::WriteHalf<BoxedDuplex>, LengthDelimitedCodec>,
    event: &PushEvent,
) -> bool {
    let encoded = match serde_json::to_vec(event) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to encode push event");
            return false;
        }
    };
    framed_write.send(Bytes::from(encoded)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_model::{TunnelId, TunnelState};
    use tokio::io::duplex;

    #[tokio::test]
    async fn to_owner_delivers_only_to_matching_subscriber() {
        let bus = Arc::new(PushBus::new());
        let owner_a = OwnerId::new();
        let owner_b = OwnerId::new();

        let (client_a, server_a) = duplex(4096);
        let (client_b, server_b) = duplex(4096);
        bus.clone().register(owner_a, Box::new(server_a)).await;
        bus.clone().register(owner_b, Box::new(server_b)).await;

        let event = PushEvent::StateChanged { tunnel_id: TunnelId::new(), state: TunnelState::Active };
        bus.to_owner(owner_a, event).await;

        let mut reader_a = FramedRead::new(client_a, LengthDelimitedCodec::new());
        let frame = tokio::time::timeout(Duration::from_secs(1), reader_a.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("frame error");
        let decoded: PushEvent = serde_json::from_slice(&frame).unwrap();
        assert!(matches!(decoded, PushEvent::StateChanged { .. }));

        drop(client_b);
    }

    #[tokio::test]
    async fn unregister_stops_further_delivery() {
        let bus = Arc::new(PushBus::new());
        let owner = OwnerId::new();
        let (_client, server) = duplex(4096);
        let handle = bus.clone().register(owner, Box::new(server)).await;

        bus.unregister(handle).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
