// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tagged counters ("measurements").
//!
//! Each series is identified by its metric name, whether its sum is reported,
//! and its sorted tag set. Recording adds to the series count and sum; a
//! drain hands every series to the caller and starts the table over.

use crate::constants::{
    TAG_ERRORS, TAG_HTTP_METHOD, TAG_HTTP_STATUS, TAG_TRANSACTION_NAME, TRANSACTION_RESPONSE_TIME,
};
use crate::tags::{identity_key, SortedTags};
use fnv::FnvHasher;
use hashbrown::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard, PoisonError};

type MeasurementMap = HashMap<String, Measurement, BuildHasherDefault<FnvHasher>>;

/// A single aggregated counter series
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub tags: SortedTags,
    pub count: i64,
    pub sum: f64,
    pub report_sum: bool,
}

/// Dimensions of one span recorded against `TransactionResponseTime`.
#[derive(Clone, Copy, Debug)]
pub struct ResponseTimeSample<'a> {
    pub transaction: &'a str,
    pub method: &'a str,
    pub status: u16,
    pub has_error: bool,
    pub value: f64,
}

#[derive(Debug, Default)]
pub struct MeasurementTable {
    measurements: Mutex<MeasurementMap>,
}

impl MeasurementTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MeasurementMap> {
        self.measurements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `count` and `value` to the series identified by
    /// (`name`, `report_sum`, `tags`), creating it on first use.
    pub fn record(&self, name: &str, tags: &SortedTags, value: f64, count: i64, report_sum: bool) {
        let mut measurements = self.lock();
        record_locked(&mut measurements, name, tags, value, count, report_sum);
    }

    /// Records the response time fan-out of one span: a series keyed by the
    /// transaction, one more per HTTP method and status, and one flagged with
    /// `Errors=true` when the span failed. All series are updated under a
    /// single lock acquisition.
    pub fn record_response_time(&self, sample: &ResponseTimeSample<'_>) {
        let primary = SortedTags::from_pairs([(TAG_TRANSACTION_NAME, sample.transaction)]);
        let with_method = primary.with(TAG_HTTP_METHOD, sample.method);
        let with_status = primary.with(TAG_HTTP_STATUS, &sample.status.to_string());
        let with_error = sample
            .has_error
            .then(|| primary.with(TAG_ERRORS, "true"));

        let mut measurements = self.lock();
        for tags in [Some(&primary), Some(&with_method), Some(&with_status), with_error.as_ref()]
            .into_iter()
            .flatten()
        {
            record_locked(
                &mut measurements,
                TRANSACTION_RESPONSE_TIME,
                tags,
                sample.value,
                1,
                true,
            );
        }
    }

    /// Takes every series recorded so far and leaves the table empty.
    /// The order of the returned series is unspecified.
    pub fn drain_and_clear(&self) -> Vec<Measurement> {
        let drained = std::mem::take(&mut *self.lock());
        drained.into_values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: &str) -> Option<Measurement> {
        self.lock().get(id).cloned()
    }
}

fn record_locked(
    measurements: &mut MeasurementMap,
    name: &str,
    tags: &SortedTags,
    value: f64,
    count: i64,
    report_sum: bool,
) {
    let id = identity_key(name, report_sum, tags);
    let entry = measurements.entry(id).or_insert_with(|| Measurement {
        name: name.to_string(),
        tags: tags.clone(),
        count: 0,
        sum: 0.0,
        report_sum,
    });
    entry.count += count;
    entry.sum += value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_measurement() {
        let table = MeasurementTable::new();

        let t1 = SortedTags::from_pairs([("t1", "tag1"), ("t2", "tag2")]);
        table.record("name1", &t1, 111.11, 1, false);
        table.record("name1", &t1, 222.0, 1, false);
        let m = table
            .get("name1&false&t1:tag1&t2:tag2&")
            .expect("measurement should exist");
        assert_eq!(m.tags.get("t1"), Some("tag1"));
        assert_eq!(m.tags.get("t2"), Some("tag2"));
        assert!((m.sum - 333.11).abs() < 1e-9);
        assert_eq!(m.count, 2);
        assert!(!m.report_sum);

        let t2 = SortedTags::from_pairs([("t3", "tag3")]);
        table.record("name2", &t2, 123.456, 3, true);
        let m = table
            .get("name2&true&t3:tag3&")
            .expect("measurement should exist");
        assert_eq!(m.tags.get("t3"), Some("tag3"));
        assert_eq!(m.sum, 123.456);
        assert_eq!(m.count, 3);
        assert!(m.report_sum);
    }

    #[test]
    fn test_report_sum_is_part_of_identity() {
        let table = MeasurementTable::new();
        let tags = SortedTags::from_pairs([("k", "v")]);
        table.record("m", &tags, 1.0, 1, true);
        table.record("m", &tags, 1.0, 1, false);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_insertion_order_does_not_split_series() {
        let table = MeasurementTable::new();
        table.record(
            "m",
            &SortedTags::from_pairs([("a", "1"), ("b", "2")]),
            1.0,
            1,
            true,
        );
        table.record(
            "m",
            &SortedTags::from_pairs([("b", "2"), ("a", "1")]),
            2.0,
            1,
            true,
        );
        let drained = table.drain_and_clear();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].count, 2);
        assert_eq!(drained[0].sum, 3.0);
    }

    #[test]
    fn test_response_time_fan_out() {
        let table = MeasurementTable::new();
        table.record_response_time(&ResponseTimeSample {
            transaction: "/users",
            method: "GET",
            status: 200,
            has_error: false,
            value: 10.0,
        });
        assert_eq!(table.len(), 3);

        table.record_response_time(&ResponseTimeSample {
            transaction: "/users",
            method: "GET",
            status: 500,
            has_error: true,
            value: 30.0,
        });
        // new: status 500 and the error series
        assert_eq!(table.len(), 5);

        let primary = table
            .get("TransactionResponseTime&true&TransactionName:/users&")
            .expect("primary series");
        assert_eq!(primary.count, 2);
        assert_eq!(primary.sum, 40.0);

        let errors = table
            .get("TransactionResponseTime&true&Errors:true&TransactionName:/users&")
            .expect("error series");
        assert_eq!(errors.count, 1);
        assert_eq!(errors.tags.len(), 2);

        let by_method = table
            .get("TransactionResponseTime&true&HttpMethod:GET&TransactionName:/users&")
            .expect("method series");
        assert_eq!(by_method.count, 2);
        assert!(table
            .get("TransactionResponseTime&true&HttpStatus:500&TransactionName:/users&")
            .is_some());
    }

    #[test]
    fn test_drain_and_clear() {
        let table = MeasurementTable::new();
        table.record("m", &SortedTags::new(), 1.0, 1, true);
        assert_eq!(table.drain_and_clear().len(), 1);
        assert!(table.drain_and_clear().is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_records_are_exact() {
        let table = Arc::new(MeasurementTable::new());
        let tags = SortedTags::from_pairs([("k", "v")]);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let tags = tags.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        table.record("m", &tags, 2.0, 1, true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        let drained = table.drain_and_clear();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].count, 8000);
        assert_eq!(drained[0].sum, 16000.0);
    }
}
