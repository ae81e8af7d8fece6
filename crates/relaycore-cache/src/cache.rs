//! `CachePubSub` (spec §6): get/set with TTL, delete, atomic incr with TTL,
//! and a fire-and-forget publish used for cross-process Push Bus
//! federation when multiple control-plane replicas exist. "When the cache
//! is unavailable, operations degrade: gets return miss, sets are
//! dropped" — callers fall back to the persistence store, never to an
//! error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[async_trait]
pub trait CachePubSub: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
    async fn delete(&self, key: &str);
    /// Atomic increment with TTL (used by an external rate limiter, not
    /// core logic). Returns the post-increment value, or `None` if the
    /// cache is unavailable.
    async fn incr(&self, key: &str, ttl: Duration) -> Option<u64>;
    async fn publish(&self, channel: &str, payload: Vec<u8>);
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Reference implementation for tests and for running the system without
/// an external Redis-like backend. `set_available(false)` simulates the
/// cache outage described in spec §6.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), available: AtomicBool::new(true) }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CachePubSub for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.is_available() {
            return None;
        }
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if !self.is_available() {
            return;
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), Entry { value, expires_at: Instant::now() + ttl });
    }

    async fn delete(&self, key: &str) {
        if !self.is_available() {
            return;
        }
        self.entries.lock().unwrap().remove(key);
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Option<u64> {
        if !self.is_available() {
            return None;
        }
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let current = match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                u64::from_be_bytes(entry.value.as_slice().try_into().unwrap_or_default())
            }
            _ => 0,
        };
        let next = current + 1;
        entries.insert(key.to_string(), Entry { value: next.to_be_bytes().to_vec(), expires_at: now + ttl });
        Some(next)
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) {
        if !self.is_available() {
            warn!(channel, "cache unavailable, dropping publish");
            return;
        }
        // Single-process reference implementation: nothing else subscribes
        // to this channel in-process (the Push Bus delivers locally);
        // federation to other control-plane replicas is an external
        // collaborator.
        tracing::debug!(channel, bytes = payload.len(), "published to cache pubsub channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn incr_accumulates_within_ttl() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.incr("hits", Duration::from_secs(60)).await, Some(1));
        assert_eq!(cache.incr("hits", Duration::from_secs(60)).await, Some(2));
    }

    #[tokio::test]
    async fn unavailable_cache_degrades_to_misses_and_dropped_sets() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;
        cache.set_available(false);

        assert_eq!(cache.get("k").await, None);
        cache.set("k2", b"v2".to_vec(), Duration::from_secs(60)).await;
        assert_eq!(cache.incr("hits", Duration::from_secs(60)).await, None);

        cache.set_available(true);
        assert_eq!(cache.get("k2").await, None);
    }
}
