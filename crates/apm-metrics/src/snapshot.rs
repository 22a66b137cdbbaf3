// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Snapshot assembly.
//!
//! Once per cycle the aggregation state is drained and turned into a single
//! BSON document:
//!
//! ```text
//! { <host identity>, Timestamp_u, MetricsFlushInterval,
//!   measurements: [ rate counts, queue stats, host metrics, runtime metrics, counters ],
//!   histograms: [ ... ],
//!   TransactionNameOverflow? }
//! ```
//!
//! Field order and presence are part of the collector contract.

use crate::constants::TRANSACTION_RESPONSE_TIME;
use crate::errors::{HistogramError, SnapshotError};
use crate::histograms::HistogramEntry;
use crate::host::HostId;
use crate::measurements::Measurement;
use crate::proc::HostMetrics;
use crate::queue_stats::QueueStatsSnapshot;
use crate::rate_counts::RateCountsSnapshot;
use crate::state::{AggregationState, DrainedCycle};
use crate::tags::SortedTags;
use bson::{doc, Bson, Document};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Value of a single named metric.
#[derive(Clone, Copy, Debug, PartialEq, derive_more::Display)]
pub enum MetricValue {
    #[display("{_0}")]
    Int32(i32),
    #[display("{_0}")]
    Int64(i64),
    #[display("{_0}")]
    Double(f64),
}

impl From<MetricValue> for Bson {
    fn from(value: MetricValue) -> Self {
        match value {
            MetricValue::Int32(v) => Bson::Int32(v),
            MetricValue::Int64(v) => Bson::Int64(v),
            MetricValue::Double(v) => Bson::Double(v),
        }
    }
}

/// Runtime counter supplied by the host process (memory, threads, GC).
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeMetric {
    pub name: String,
    pub value: MetricValue,
}

impl RuntimeMetric {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Result of encoding one histogram into the message.
#[derive(Debug)]
pub enum EntryOutcome {
    Encoded { name: String },
    Omitted { name: String, error: HistogramError },
}

impl EntryOutcome {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            EntryOutcome::Encoded { name } | EntryOutcome::Omitted { name, .. } => name,
        }
    }

    #[must_use]
    pub fn is_encoded(&self) -> bool {
        matches!(self, EntryOutcome::Encoded { .. })
    }
}

/// An encoded metrics message and the outcome of every histogram in it.
#[derive(Debug)]
pub struct Snapshot {
    pub message: Vec<u8>,
    pub outcomes: Vec<EntryOutcome>,
}

impl Snapshot {
    /// Number of histograms left out of the message
    #[must_use]
    pub fn omitted(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_encoded()).count()
    }
}

/// Inputs of a snapshot that do not come from the aggregation state.
#[derive(Clone, Debug)]
pub struct SnapshotContext<'a> {
    pub host: &'a HostId,
    pub flush_interval_secs: i32,
    pub host_metrics: HostMetrics,
    pub runtime_metrics: Vec<RuntimeMetric>,
    /// Microseconds since the Unix epoch
    pub timestamp_micros: i64,
}

impl<'a> SnapshotContext<'a> {
    /// Context stamped with the current time and without host or runtime
    /// metrics.
    #[must_use]
    pub fn new(host: &'a HostId, flush_interval_secs: i32) -> Self {
        Self {
            host,
            flush_interval_secs,
            host_metrics: HostMetrics::default(),
            runtime_metrics: Vec::new(),
            timestamp_micros: now_micros(),
        }
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Drains `state` and encodes the cycle as a metrics message.
///
/// A histogram that fails to encode is logged and left out; the rest of the
/// message is still produced.
pub fn assemble(
    state: &AggregationState,
    context: &SnapshotContext<'_>,
) -> Result<Snapshot, SnapshotError> {
    let cycle = state.drain();
    encode_cycle(cycle, context)
}

/// Encodes an already drained cycle.
pub fn encode_cycle(
    cycle: DrainedCycle,
    context: &SnapshotContext<'_>,
) -> Result<Snapshot, SnapshotError> {
    let mut message = Document::new();
    context.host.append_to(&mut message);
    message.insert("Timestamp_u", context.timestamp_micros);
    message.insert("MetricsFlushInterval", context.flush_interval_secs);

    let mut measurements = Vec::with_capacity(cycle.measurements.len() + 32);
    append_rate_counts(&mut measurements, &cycle.rate_counts);
    append_queue_stats(&mut measurements, &cycle.queue_stats);
    append_host_metrics(&mut measurements, &context.host_metrics);
    for metric in &context.runtime_metrics {
        measurements.push(metric_value(&metric.name, metric.value));
    }
    measurements.extend(cycle.measurements.iter().map(measurement_document));
    message.insert("measurements", measurements);

    let (histograms, outcomes) = encode_histograms(&cycle.histograms, HistogramEntry::encode);
    message.insert("histograms", histograms);

    if cycle.transaction_overflow {
        message.insert("TransactionNameOverflow", true);
    }

    let mut bytes = Vec::new();
    message.to_writer(&mut bytes)?;
    debug!(
        "Assembled metrics message of {} bytes with {} measurements and {} histograms",
        bytes.len(),
        cycle.measurements.len(),
        cycle.histograms.len()
    );

    Ok(Snapshot {
        message: bytes,
        outcomes,
    })
}

fn metric_value(name: &str, value: MetricValue) -> Bson {
    Bson::Document(doc! {
        "name": name,
        "value": Bson::from(value),
    })
}

fn append_rate_counts(out: &mut Vec<Bson>, rc: &RateCountsSnapshot) {
    for (name, value) in [
        ("RequestCount", rc.requested),
        ("TraceCount", rc.traced),
        ("TokenBucketExhaustionCount", rc.limited),
        ("SampleCount", rc.sampled),
        ("ThroughTraceCount", rc.through),
    ] {
        out.push(metric_value(name, MetricValue::Int64(value)));
    }
}

fn append_queue_stats(out: &mut Vec<Bson>, q: &QueueStatsSnapshot) {
    for (name, value) in [
        ("NumSent", q.num_sent),
        ("NumOverflowed", q.num_overflowed),
        ("NumFailed", q.num_failed),
        ("TotalEvents", q.total_events),
        ("QueueLargest", q.queue_largest),
    ] {
        out.push(metric_value(name, MetricValue::Int64(value)));
    }
}

fn append_host_metrics(out: &mut Vec<Bson>, host: &HostMetrics) {
    if let Some(load) = host.load1 {
        out.push(metric_value("Load1", MetricValue::Double(load)));
    }
    if let Some(total) = host.total_ram {
        out.push(metric_value("TotalRAM", MetricValue::Int64(total)));
    }
    if let Some(free) = host.free_ram {
        out.push(metric_value("FreeRAM", MetricValue::Int64(free)));
    }
    if let Some(rss) = host.process_ram {
        out.push(metric_value("ProcessRAM", MetricValue::Int32(rss)));
    }
}

/// Tags with names and values cut to their wire limits. Names that only
/// differ past the limit collapse to one key; the first one in sorted order
/// keeps its value.
fn tags_document(tags: &SortedTags) -> Document {
    let mut doc = Document::new();
    for (name, value) in tags.truncated() {
        if !doc.contains_key(name) {
            doc.insert(name, value);
        }
    }
    doc
}

fn measurement_document(m: &Measurement) -> Bson {
    let mut doc = Document::new();
    doc.insert("name", m.name.as_str());
    doc.insert(
        "count",
        i32::try_from(m.count).map_or(Bson::Int64(m.count), Bson::Int32),
    );
    if m.report_sum {
        doc.insert("sum", m.sum);
    }
    if !m.tags.is_empty() {
        doc.insert("tags", tags_document(&m.tags));
    }
    Bson::Document(doc)
}

fn encode_histograms<F>(entries: &[HistogramEntry], encode: F) -> (Vec<Bson>, Vec<EntryOutcome>)
where
    F: Fn(&HistogramEntry) -> Result<String, HistogramError>,
{
    let mut encoded = Vec::with_capacity(entries.len());
    let mut outcomes = Vec::with_capacity(entries.len());

    for entry in entries {
        match encode(entry) {
            Ok(value) => {
                let mut doc = doc! {
                    "name": TRANSACTION_RESPONSE_TIME,
                    "value": value,
                };
                if !entry.tags.is_empty() {
                    doc.insert("tags", tags_document(&entry.tags));
                }
                encoded.push(Bson::Document(doc));
                outcomes.push(EntryOutcome::Encoded {
                    name: entry.name.clone(),
                });
            }
            Err(e) => {
                error!("Failed to encode histogram '{}': {e}", entry.name);
                outcomes.push(EntryOutcome::Omitted {
                    name: entry.name.clone(),
                    error: e,
                });
            }
        }
    }

    (encoded, outcomes)
}
