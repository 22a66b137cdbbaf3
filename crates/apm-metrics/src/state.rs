// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide aggregation state.
//!
//! `AggregationState` owns every table fed by span reporting. It is built once
//! from a [`MetricsConfig`], shared behind an `Arc`, and drained by a single
//! flush driver. Each table carries its own lock; a drain takes them one after
//! the other and never holds two at once.

use crate::config::MetricsConfig;
use crate::histograms::{HistogramEntry, HistogramTable};
use crate::measurements::{Measurement, MeasurementTable};
use crate::queue_stats::{QueueStats, QueueStatsSnapshot};
use crate::rate_counts::{RateCounts, RateCountsSnapshot};
use crate::span::HttpSpanMessage;
use crate::transaction::TransactionRegistry;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

#[derive(Debug)]
pub struct AggregationState {
    registry: TransactionRegistry,
    measurements: MeasurementTable,
    histograms: HistogramTable,
    queue_stats: QueueStats,
    rate_counts: RateCounts,
    // held for the whole of a drain so two drains never interleave
    drain_guard: Mutex<()>,
}

/// Everything accumulated during one cycle, taken out of the tables.
#[derive(Debug)]
pub struct DrainedCycle {
    pub measurements: Vec<Measurement>,
    pub histograms: Vec<HistogramEntry>,
    pub queue_stats: QueueStatsSnapshot,
    pub rate_counts: RateCountsSnapshot,
    pub transaction_overflow: bool,
}

impl Default for AggregationState {
    fn default() -> Self {
        Self::new(&MetricsConfig::default())
    }
}

impl AggregationState {
    #[must_use]
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            registry: TransactionRegistry::new(config.transaction_capacity),
            measurements: MeasurementTable::new(),
            histograms: HistogramTable::new(config.histogram_precision),
            queue_stats: QueueStats::new(),
            rate_counts: RateCounts::new(),
            drain_guard: Mutex::new(()),
        }
    }

    /// Records one completed span. Never blocks on I/O and never fails.
    pub fn record_span(&self, span: &HttpSpanMessage) {
        span.process(self);
    }

    #[must_use]
    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn measurements(&self) -> &MeasurementTable {
        &self.measurements
    }

    #[must_use]
    pub fn histograms(&self) -> &HistogramTable {
        &self.histograms
    }

    #[must_use]
    pub fn queue_stats(&self) -> &QueueStats {
        &self.queue_stats
    }

    #[must_use]
    pub fn rate_counts(&self) -> &RateCounts {
        &self.rate_counts
    }

    /// Closes the current cycle and returns its contents.
    ///
    /// Tables are drained in a fixed order: measurements, histograms, queue
    /// statistics, then the transaction registry. Writers keep recording into
    /// the next cycle while the drain is in progress.
    pub fn drain(&self) -> DrainedCycle {
        let _guard = self
            .drain_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let measurements = self.measurements.drain_and_clear();
        let histograms = self.histograms.drain_and_clear();
        let queue_stats = self.queue_stats.copy_and_reset();
        let rate_counts = self.rate_counts.flush();
        let transaction_overflow = self.registry.reset();

        debug!(
            "Drained {} measurements and {} histograms, transaction overflow: {}",
            measurements.len(),
            histograms.len(),
            transaction_overflow
        );

        DrainedCycle {
            measurements,
            histograms,
            queue_stats,
            rate_counts,
            transaction_overflow,
        }
    }
}
