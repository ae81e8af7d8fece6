//! Live, concurrently-updated counters backing a running data-plane
//! instance (spec I5: "Counters are updated only by the relay owning the
//! corresponding instance; readers observe eventual consistency").

use crate::tunnel::Counters;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub connection_count: AtomicU64,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_connections(&self) {
        self.connection_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time, eventually-consistent snapshot for readers.
    pub fn snapshot(&self) -> Counters {
        Counters {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            connection_count: self.connection_count.load(Ordering::Relaxed),
        }
    }
}
