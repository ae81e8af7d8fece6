//! Per-stream flow-control window (spec §4.2: "the sender may not have
//! more in flight on a stream than the peer's current window").

use std::sync::Mutex;
use tokio::sync::Notify;

/// Tracks how many bytes this side is still permitted to send on a
/// stream. `consume` blocks the writer until the peer replenishes the
/// window via a window-update frame.
pub struct SendWindow {
    remaining: Mutex<u64>,
    notify: Notify,
}

impl SendWindow {
    pub fn new(initial: u32) -> Self {
        Self { remaining: Mutex::new(initial as u64), notify: Notify::new() }
    }

    /// Reserves up to `want` bytes of window, blocking until at least one
    /// byte is available. Returns the amount actually reserved (may be
    /// less than `want`, the caller should chunk accordingly).
    pub async fn reserve(&self, want: u32) -> u32 {
        loop {
            {
                let mut remaining = self.remaining.lock().unwrap();
                if *remaining > 0 {
                    let grant = (*remaining).min(want as u64) as u32;
                    *remaining -= grant as u64;
                    return grant;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn replenish(&self, amount: u32) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining += amount as u64;
        drop(remaining);
        self.notify.notify_waiters();
    }
}

/// Tracks how many bytes this side has received but not yet told the
/// peer about. Once half the buffer has been consumed by the reader, a
/// window-update frame should be emitted.
pub struct RecvWindow {
    capacity: u32,
    unacked: Mutex<u32>,
}

impl RecvWindow {
    pub fn new(capacity: u32) -> Self {
        Self { capacity, unacked: Mutex::new(0) }
    }

    /// Records that `n` bytes were delivered to the reader. Returns
    /// `Some(amount)` once enough has accumulated to justify a
    /// window-update frame for `amount` bytes.
    pub fn on_consumed(&self, n: u32) -> Option<u32> {
        let mut unacked = self.unacked.lock().unwrap();
        *unacked += n;
        if *unacked >= self.capacity / 2 {
            let amount = *unacked;
            *unacked = 0;
            Some(amount)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_blocks_until_replenished() {
        let window = SendWindow::new(0);
        let grant = tokio::time::timeout(std::time::Duration::from_millis(50), window.reserve(10)).await;
        assert!(grant.is_err(), "should not have granted window yet");

        window.replenish(10);
        let grant = tokio::time::timeout(std::time::Duration::from_millis(50), window.reserve(10))
            .await
            .unwrap();
        assert_eq!(grant, 10);
    }

    #[test]
    fn recv_window_emits_update_at_half_capacity() {
        let recv = RecvWindow::new(100);
        assert_eq!(recv.on_consumed(40), None);
        assert_eq!(recv.on_consumed(20), Some(60));
    }
}
