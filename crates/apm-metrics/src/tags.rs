// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tag sets attached to measurements and histograms.
//!
//! Tags are kept sorted by name, then value, from the moment they are built,
//! so the identity of a series never depends on the order in which the caller
//! inserted its tags.

use crate::constants::{MAX_TAG_NAME_LENGTH, MAX_TAG_VALUE_LENGTH};
use std::fmt::Write;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SortedTags {
    values: Vec<(String, String)>,
}

impl SortedTags {
    #[must_use]
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Builds a tag set from name/value pairs in any order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        values.sort_unstable();
        values.dedup();
        Self { values }
    }

    /// Returns a copy of this set with one more tag.
    #[must_use]
    pub fn with(&self, name: &str, value: &str) -> Self {
        let mut values = self.values.clone();
        let entry = (name.to_string(), value.to_string());
        if let Err(position) = values.binary_search(&entry) {
            values.insert(position, entry);
        }
        Self { values }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Tags as they go on the wire: names capped at 64 characters, values at 255.
    pub fn truncated(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().map(|(k, v)| {
            (
                truncate_chars(k, MAX_TAG_NAME_LENGTH),
                truncate_chars(v, MAX_TAG_VALUE_LENGTH),
            )
        })
    }
}

/// Renders the identity of a measurement series.
///
/// The layout is `name&reportSum&k1:v1&k2:v2&`, with tags in sorted order.
#[must_use]
pub fn identity_key(metric_name: &str, report_sum: bool, tags: &SortedTags) -> String {
    let mut id = String::with_capacity(metric_name.len() + 8 + tags.len() * 24);
    id.push_str(metric_name);
    id.push('&');
    id.push_str(if report_sum { "true" } else { "false" });
    id.push('&');
    for (k, v) in tags.iter() {
        let _ = write!(id, "{k}:{v}&");
    }
    id
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
