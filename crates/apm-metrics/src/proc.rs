// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host metrics read from the Linux `/proc` filesystem.
//!
//! Every value is optional: a file that is missing or does not parse only
//! drops that value from the metrics message. On systems without `/proc` all
//! values are absent.

use std::fs::File;
use std::io::{self, BufRead};
use tracing::debug;

pub const PROC_LOADAVG_PATH: &str = "/proc/loadavg";
pub const PROC_MEMINFO_PATH: &str = "/proc/meminfo";
pub const PROC_SELF_STATUS_PATH: &str = "/proc/self/status";

/// Host level values reported next to the queue statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HostMetrics {
    /// One minute load average
    pub load1: Option<f64>,
    /// Total memory in bytes
    pub total_ram: Option<i64>,
    /// Free memory in bytes
    pub free_ram: Option<i64>,
    /// Resident set size of this process in kB
    pub process_ram: Option<i32>,
}

impl HostMetrics {
    /// Reads all host metrics from their default locations.
    #[must_use]
    pub fn collect() -> Self {
        Self::collect_from_paths(PROC_LOADAVG_PATH, PROC_MEMINFO_PATH, PROC_SELF_STATUS_PATH)
    }

    fn collect_from_paths(loadavg: &str, meminfo: &str, status: &str) -> Self {
        let load1 = get_load1_from_path(loadavg)
            .map_err(|e| debug!("Could not read load average: {e}"))
            .ok();
        let (total_ram, free_ram) = match get_memory_from_path(meminfo) {
            Ok(memory) => (Some(memory.total_bytes), Some(memory.free_bytes)),
            Err(e) => {
                debug!("Could not read memory info: {e}");
                (None, None)
            }
        };
        let process_ram = get_process_ram_from_path(status)
            .map_err(|e| debug!("Could not read process memory: {e}"))
            .ok();

        Self {
            load1,
            total_ram,
            free_ram,
            process_ram,
        }
    }
}

fn not_found(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{what} not found"))
}

/// Parses the first field of `/proc/loadavg`.
///
/// ```text
/// 0.42 0.37 0.30 1/523 12345
/// ```
fn get_load1_from_path(path: &str) -> Result<f64, io::Error> {
    let contents = std::fs::read_to_string(path)?;
    contents
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| not_found("Load average"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MemoryData {
    total_bytes: i64,
    free_bytes: i64,
}

/// Reads `MemTotal` and `MemFree` (kB) from `/proc/meminfo`.
fn get_memory_from_path(path: &str) -> Result<MemoryData, io::Error> {
    let reader = io::BufReader::new(File::open(path)?);
    let mut total = None;
    let mut free = None;

    for line in reader.lines() {
        let line = line?;
        let mut values = line.split_whitespace();
        match values.next() {
            Some("MemTotal:") => total = values.next().and_then(|s| s.parse::<i64>().ok()),
            Some("MemFree:") => free = values.next().and_then(|s| s.parse::<i64>().ok()),
            _ => continue,
        }
        if total.is_some() && free.is_some() {
            break;
        }
    }

    match (total, free) {
        (Some(total_kb), Some(free_kb)) => Ok(MemoryData {
            total_bytes: total_kb.saturating_mul(1024),
            free_bytes: free_kb.saturating_mul(1024),
        }),
        _ => Err(not_found("Memory data")),
    }
}

/// Reads `VmRSS` (kB) from `/proc/self/status`.
fn get_process_ram_from_path(path: &str) -> Result<i32, io::Error> {
    let reader = io::BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let mut values = line.split_whitespace();
        if values.next() == Some("VmRSS:") {
            return values
                .next()
                .and_then(|s| s.parse::<i64>().ok())
                .map(|kb| i32::try_from(kb).unwrap_or(i32::MAX))
                .ok_or_else(|| not_found("VmRSS"));
        }
    }
    Err(not_found("VmRSS"))
}
