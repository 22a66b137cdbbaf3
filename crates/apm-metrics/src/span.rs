// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Completed HTTP spans reported by the instrumentation layer.

use crate::measurements::ResponseTimeSample;
use crate::state::AggregationState;
use crate::transaction::{classify, Classification};
use std::time::Duration;

/// One completed unit of work.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpSpanMessage {
    /// Explicit transaction name, empty if the span was not named
    pub transaction: String,
    /// Escaped request path, used when no name is given
    pub path: String,
    pub duration: Duration,
    pub status: u16,
    pub method: String,
    pub has_error: bool,
}

impl HttpSpanMessage {
    /// Folds this span into `state`.
    ///
    /// The overall histogram is always updated. A transaction admitted by the
    /// registry also gets its own histogram; "other" and "unknown" spans only
    /// feed the response time measurements.
    pub fn process(&self, state: &AggregationState) {
        state.histograms().record("", self.duration);

        let classification = classify(state.registry(), &self.transaction, &self.path);
        if let Classification::Named(name) = &classification {
            state.histograms().record(name, self.duration);
        }
        self.process_measurements(state, classification.transaction_name());
    }

    fn process_measurements(&self, state: &AggregationState, transaction: &str) {
        state
            .measurements()
            .record_response_time(&ResponseTimeSample {
                transaction,
                method: &self.method,
                status: self.status,
                has_error: self.has_error,
                // sums are reported in nanoseconds
                value: self.duration.as_nanos() as f64,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;

    fn span(transaction: &str, path: &str, micros: u64) -> HttpSpanMessage {
        HttpSpanMessage {
            transaction: transaction.to_string(),
            path: path.to_string(),
            duration: Duration::from_micros(micros),
            status: 200,
            method: "GET".to_string(),
            has_error: false,
        }
    }

    fn state_with_capacity(capacity: usize) -> AggregationState {
        AggregationState::new(&MetricsConfig {
            transaction_capacity: capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_named_span_gets_its_own_histogram() {
        let state = state_with_capacity(10);
        span("checkout", "", 1500).process(&state);

        assert_eq!(state.histograms().len(), 2);
        assert_eq!(state.histograms().get("").expect("overall").count(), 1);
        assert_eq!(state.histograms().get("checkout").expect("named").count(), 1);

        let m = state
            .measurements()
            .get("TransactionResponseTime&true&TransactionName:checkout&")
            .expect("primary series");
        assert_eq!(m.count, 1);
        assert_eq!(m.sum, 1_500_000.0);
    }

    #[test]
    fn test_path_is_used_when_name_is_missing() {
        let state = state_with_capacity(10);
        span("", "/users/42/orders/7", 10).process(&state);
        assert!(state.histograms().get("/users/42/orders").is_some());
    }

    #[test]
    fn test_overflowed_span_only_feeds_overall_histogram() {
        let state = state_with_capacity(1);
        span("first", "", 10).process(&state);
        span("second", "", 20).process(&state);

        assert_eq!(state.histograms().get("").expect("overall").count(), 2);
        assert!(state.histograms().get("second").is_none());
        assert!(state.registry().is_overflowing());
        assert!(state
            .measurements()
            .get("TransactionResponseTime&true&TransactionName:other&")
            .is_some());
    }

    #[test]
    fn test_unknown_span_does_not_consume_capacity() {
        let state = state_with_capacity(1);
        span("", "", 10).process(&state);

        assert!(state.registry().is_empty());
        assert_eq!(state.histograms().len(), 1);
        assert!(state
            .measurements()
            .get("TransactionResponseTime&true&TransactionName:unknown&")
            .is_some());
    }

    #[test]
    fn test_error_span_adds_error_series() {
        let state = state_with_capacity(10);
        let mut failed = span("pay", "", 10);
        failed.status = 503;
        failed.has_error = true;
        failed.process(&state);

        assert_eq!(state.measurements().len(), 4);
        assert!(state
            .measurements()
            .get("TransactionResponseTime&true&HttpStatus:503&TransactionName:pay&")
            .is_some());
    }
}
