// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request correlator: pairs an outgoing remote call with a caller-blocking
//! wait keyed by the transport-assigned sequence id.
//!
//! The caller registers *before* writing the request frame, which closes the
//! race where the reply lands ahead of the registration. The dispatch thread
//! completes the slot on Reply arrival; the caller blocks on it with a
//! bounded timeout. A timed-out call stops waiting without cancelling the
//! request in flight; its late reply finds no slot and is dropped silently.

use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ReplySlot {
    body: Mutex<Option<Vec<u8>>>,
    arrived: Condvar,
}

/// Table of in-flight remote calls.
pub struct PendingRequests {
    slots: DashMap<u32, Arc<ReplySlot>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Register an in-flight call. The returned guard unregisters on drop.
    pub fn register(&self, sequence: u32) -> PendingGuard<'_> {
        let slot = Arc::new(ReplySlot {
            body: Mutex::new(None),
            arrived: Condvar::new(),
        });
        self.slots.insert(sequence, Arc::clone(&slot));
        PendingGuard {
            table: self,
            sequence,
            slot,
        }
    }

    /// Complete the call waiting on `sequence` with the reply body.
    ///
    /// Returns `false` when no caller is waiting (late reply after timeout);
    /// the body is discarded in that case.
    pub fn complete(&self, sequence: u32, body: Vec<u8>) -> bool {
        let Some((_, slot)) = self.slots.remove(&sequence) else {
            return false;
        };
        *slot.body.lock() = Some(body);
        slot.arrived.notify_one();
        true
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// One registered in-flight call.
pub struct PendingGuard<'a> {
    table: &'a PendingRequests,
    sequence: u32,
    slot: Arc<ReplySlot>,
}

impl PendingGuard<'_> {
    /// Block the calling thread until the reply arrives or the deadline
    /// fires.
    ///
    /// # Errors
    ///
    /// `Timeout` when no reply arrived within `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut body = self.slot.body.lock();
        loop {
            if let Some(reply) = body.take() {
                return Ok(reply);
            }
            if self.slot.arrived.wait_until(&mut body, deadline).timed_out() {
                // One last check: completion may have won the race with the
                // deadline.
                return body.take().ok_or(Error::Timeout);
            }
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.slots.remove(&self.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_reply_before_wait() {
        let table = PendingRequests::new();
        let guard = table.register(1);
        assert!(table.complete(1, b"hello".to_vec()));
        assert_eq!(guard.wait(Duration::from_millis(10)).unwrap(), b"hello");
    }

    #[test]
    fn test_reply_wakes_waiter() {
        let table = Arc::new(PendingRequests::new());
        let guard = table.register(7);

        let completer = Arc::clone(&table);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            completer.complete(7, b"late but in time".to_vec())
        });

        let body = guard.wait(Duration::from_secs(2)).unwrap();
        assert_eq!(body, b"late but in time");
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_timeout_expires() {
        let table = PendingRequests::new();
        let guard = table.register(3);

        let start = Instant::now();
        let result = guard.wait(Duration::from_millis(50));
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_late_reply_dropped() {
        let table = PendingRequests::new();
        {
            let guard = table.register(9);
            let _ = guard.wait(Duration::from_millis(10));
        }
        // Guard dropped: the slot is gone, the late reply has no taker.
        assert!(!table.complete(9, b"too late".to_vec()));
        assert_eq!(table.in_flight(), 0);
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let table = PendingRequests::new();
        {
            let _guard = table.register(11);
            assert_eq!(table.in_flight(), 1);
        }
        assert_eq!(table.in_flight(), 0);
    }

    #[test]
    fn test_independent_sequences() {
        let table = Arc::new(PendingRequests::new());
        let first = table.register(1);
        let second = table.register(2);

        table.complete(2, b"two".to_vec());
        table.complete(1, b"one".to_vec());

        assert_eq!(first.wait(Duration::from_millis(10)).unwrap(), b"one");
        assert_eq!(second.wait(Duration::from_millis(10)).unwrap(), b"two");
    }
}
