// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicI64, Ordering};

/// Request counters maintained by the sampler and reported once per cycle.
#[derive(Debug, Default)]
pub struct RateCounts {
    requested: AtomicI64,
    sampled: AtomicI64,
    limited: AtomicI64,
    traced: AtomicI64,
    through: AtomicI64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateCountsSnapshot {
    pub requested: i64,
    pub sampled: i64,
    pub limited: i64,
    pub traced: i64,
    pub through: i64,
}

impl RateCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A request reached the sampling decision
    pub fn inc_requested(&self) {
        self.requested.fetch_add(1, Ordering::Relaxed);
    }

    /// The sample rate selected the request
    pub fn inc_sampled(&self) {
        self.sampled.fetch_add(1, Ordering::Relaxed);
    }

    /// The token bucket was empty
    pub fn inc_limited(&self) {
        self.limited.fetch_add(1, Ordering::Relaxed);
    }

    /// The request was traced
    pub fn inc_traced(&self) {
        self.traced.fetch_add(1, Ordering::Relaxed);
    }

    /// The request was traced because an upstream service decided so
    pub fn inc_through(&self) {
        self.through.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush(&self) -> RateCountsSnapshot {
        RateCountsSnapshot {
            requested: self.requested.swap(0, Ordering::Relaxed),
            sampled: self.sampled.swap(0, Ordering::Relaxed),
            limited: self.limited.swap(0, Ordering::Relaxed),
            traced: self.traced.swap(0, Ordering::Relaxed),
            through: self.through.swap(0, Ordering::Relaxed),
        }
    }
}
