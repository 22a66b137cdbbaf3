// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Transaction name used when a span carries neither a name nor a path.
pub const UNKNOWN_TRANSACTION_NAME: &str = "unknown";
/// Transaction name used once the per-cycle transaction budget is exhausted.
pub const OTHER_TRANSACTION_NAME: &str = "other";
/// Number of path segments kept when deriving a transaction name from a URL path.
pub const MAX_PATH_SEGMENTS_FOR_TRANSACTION_NAME: usize = 3;

/// Default number of distinct transaction names admitted per cycle.
pub const DEFAULT_TRANSACTION_CAPACITY: usize = 200;
/// Default number of significant figures kept by latency histograms.
pub const DEFAULT_HISTOGRAM_PRECISION: u8 = 2;
pub const MAX_HISTOGRAM_PRECISION: u8 = 5;
/// Default period between two snapshots, in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

/// Smallest latency (µs) the histograms distinguish.
pub const HISTOGRAM_LOWEST_DISCERNIBLE: u64 = 1;
/// One hour in microseconds; anything above is rejected by the histograms.
pub const HISTOGRAM_HIGHEST_TRACKABLE: u64 = 3_600_000_000;

pub const MAX_TAG_NAME_LENGTH: usize = 64;
pub const MAX_TAG_VALUE_LENGTH: usize = 255;

pub const TRANSACTION_RESPONSE_TIME: &str = "TransactionResponseTime";

// tag names
pub const TAG_TRANSACTION_NAME: &str = "TransactionName";
pub const TAG_HTTP_METHOD: &str = "HttpMethod";
pub const TAG_HTTP_STATUS: &str = "HttpStatus";
pub const TAG_ERRORS: &str = "Errors";
