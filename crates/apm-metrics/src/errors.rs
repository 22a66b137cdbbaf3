// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while creating, recording into or encoding a latency histogram
#[derive(Debug, thiserror::Error)]
pub enum HistogramError {
    #[error("Invalid histogram configuration: {0}")]
    Creation(String),

    #[error("value to large to record: {value}")]
    Record { value: u64 },

    #[error("Failed to serialize histogram: {0}")]
    Serialize(String),

    #[error("Failed to compress histogram: {0}")]
    Compress(#[from] std::io::Error),
}

/// Errors raised while assembling the outgoing metrics message
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Failed to encode metrics message: {0}")]
    Encode(#[from] bson::ser::Error),
}

/// Errors raised by configuration validation
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Histogram precision must be between 0 and 5, got {0}")]
    InvalidPrecision(u8),

    #[error("Transaction capacity must be greater than 0")]
    InvalidCapacity,

    #[error("Flush interval must be greater than 0")]
    InvalidInterval,
}

/// Errors reported by a transport when handing off a metrics message
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to send metrics message: {0}")]
    Send(String),
}
