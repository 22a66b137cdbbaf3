// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_HISTOGRAM_PRECISION, DEFAULT_TRANSACTION_CAPACITY,
    MAX_HISTOGRAM_PRECISION,
};
use crate::errors::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

pub const ENV_HISTOGRAM_PRECISION: &str = "APM_HISTOGRAM_PRECISION";
pub const ENV_TRANSACTION_CAPACITY: &str = "APM_TRANSACTION_CAPACITY";
pub const ENV_FLUSH_INTERVAL: &str = "APM_METRICS_FLUSH_INTERVAL";
pub const ENV_HOSTNAME_ALIAS: &str = "APM_HOSTNAME_ALIAS";

/// Configuration consumed by the metrics aggregation core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Significant figures kept by latency histograms (0-5)
    pub histogram_precision: u8,
    /// Maximum number of distinct transaction names per cycle
    pub transaction_capacity: usize,
    /// Period between two snapshots
    pub flush_interval: Duration,
    /// Optional user-configured hostname reported next to the detected one
    pub hostname_alias: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_precision: DEFAULT_HISTOGRAM_PRECISION,
            transaction_capacity: DEFAULT_TRANSACTION_CAPACITY,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            hostname_alias: None,
        }
    }
}

impl MetricsConfig {
    /// Create configuration from environment variables.
    ///
    /// Values that fail to parse or fall out of range are logged and the
    /// default is kept, so a bad variable never disables metrics.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let histogram_precision = parse_env::<u8>(ENV_HISTOGRAM_PRECISION)
            .filter(|p| {
                let valid = *p <= MAX_HISTOGRAM_PRECISION;
                if !valid {
                    error!("value of {ENV_HISTOGRAM_PRECISION} must be between 0 and 5: {p}");
                }
                valid
            })
            .unwrap_or(defaults.histogram_precision);
        if histogram_precision != DEFAULT_HISTOGRAM_PRECISION {
            info!("Non-default {ENV_HISTOGRAM_PRECISION}: {histogram_precision}");
        }

        let transaction_capacity = parse_env::<usize>(ENV_TRANSACTION_CAPACITY)
            .filter(|c| {
                if *c == 0 {
                    error!("value of {ENV_TRANSACTION_CAPACITY} must be greater than 0");
                }
                *c > 0
            })
            .unwrap_or(defaults.transaction_capacity);

        let flush_interval = parse_env::<u64>(ENV_FLUSH_INTERVAL)
            .filter(|secs| {
                if *secs == 0 {
                    error!("value of {ENV_FLUSH_INTERVAL} must be greater than 0");
                }
                *secs > 0
            })
            .map_or(defaults.flush_interval, Duration::from_secs);

        let hostname_alias = env::var(ENV_HOSTNAME_ALIAS)
            .ok()
            .map(|alias| alias.trim().to_string())
            .filter(|alias| !alias.is_empty());

        Self {
            histogram_precision,
            transaction_capacity,
            flush_interval,
            hostname_alias,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.histogram_precision > MAX_HISTOGRAM_PRECISION {
            return Err(ConfigError::InvalidPrecision(self.histogram_precision));
        }
        if self.transaction_capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(())
    }

    /// Flush interval in whole seconds, as carried by the metrics message
    #[must_use]
    pub fn flush_interval_secs(&self) -> i32 {
        i32::try_from(self.flush_interval.as_secs()).unwrap_or(i32::MAX)
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("value of {name} is not a valid number: {trimmed}");
            None
        }
    }
}
