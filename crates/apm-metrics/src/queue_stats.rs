// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Health counters of the upstream event queue.
//!
//! Writers bump the counters from any thread without locking; the snapshot
//! assembler swaps every counter back to zero once per cycle. Each field is
//! swapped independently, so a snapshot is consistent per field only.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct QueueStats {
    num_sent: AtomicI64,
    num_overflowed: AtomicI64,
    num_failed: AtomicI64,
    total_events: AtomicI64,
    queue_largest: AtomicI64,
}

/// Values of [`QueueStats`] taken at flush time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub num_sent: i64,
    pub num_overflowed: i64,
    pub num_failed: i64,
    pub total_events: i64,
    pub queue_largest: i64,
}

impl QueueStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sent(&self, n: i64) {
        self.num_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_overflowed(&self, n: i64) {
        self.num_overflowed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_failed(&self, n: i64) {
        self.num_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_total(&self, n: i64) {
        self.total_events.fetch_add(n, Ordering::Relaxed);
    }

    /// Raises the queue high-water mark to `count` if it is larger.
    pub fn set_queue_largest(&self, count: i64) {
        let mut current = self.queue_largest.load(Ordering::Relaxed);
        while count > current {
            match self.queue_largest.compare_exchange_weak(
                current,
                count,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the current values and resets every counter to zero.
    pub fn copy_and_reset(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            num_sent: self.num_sent.swap(0, Ordering::Relaxed),
            num_overflowed: self.num_overflowed.swap(0, Ordering::Relaxed),
            num_failed: self.num_failed.swap(0, Ordering::Relaxed),
            total_events: self.total_events.swap(0, Ordering::Relaxed),
            queue_largest: self.queue_largest.swap(0, Ordering::Relaxed),
        }
    }

    /// Current values without resetting
    #[must_use]
    pub fn peek(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            num_sent: self.num_sent.load(Ordering::Relaxed),
            num_overflowed: self.num_overflowed.load(Ordering::Relaxed),
            num_failed: self.num_failed.load(Ordering::Relaxed),
            total_events: self.total_events.load(Ordering::Relaxed),
            queue_largest: self.queue_largest.load(Ordering::Relaxed),
        }
    }
}
