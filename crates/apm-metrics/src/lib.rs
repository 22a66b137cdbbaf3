// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # APM metrics
//!
//! Aggregation core of an APM agent: completed spans are folded into
//! cardinality-limited latency histograms and tagged counters, and once per
//! cycle everything is drained into a single BSON metrics message.
//!
//! - [`state::AggregationState`] owns the tables and is shared by writers.
//! - [`span::HttpSpanMessage`] is what the instrumentation reports.
//! - [`snapshot::assemble`] drains a cycle into a message.
//! - [`flusher::Flusher`] drives the cycle on a timer and hands messages to a
//!   [`flusher::MetricsTransport`].

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod constants;
pub mod errors;
pub mod flusher;
pub mod histograms;
pub mod host;
pub mod logger;
pub mod measurements;
pub mod proc;
pub mod queue_stats;
pub mod rate_counts;
pub mod snapshot;
pub mod span;
pub mod state;
pub mod tags;
pub mod transaction;
