// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-cycle cardinality limit on transaction names.
//!
//! Every distinct transaction name admitted during a cycle gets its own
//! histogram and measurement series. A misbehaving application can generate
//! an unbounded number of names (ids embedded in routes, raw URLs), so the
//! registry admits at most `capacity` distinct names per cycle and reports
//! the rest as the "other" transaction.
//!
//! Capacity changes pushed by the collector are staged and only applied when
//! the cycle is reset, so the limit never moves in the middle of a cycle.

use crate::constants::{
    MAX_PATH_SEGMENTS_FOR_TRANSACTION_NAME, OTHER_TRANSACTION_NAME, UNKNOWN_TRANSACTION_NAME,
};
use fnv::FnvHasher;
use hashbrown::HashSet;
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

type NameSet = HashSet<String, BuildHasherDefault<FnvHasher>>;

#[derive(Debug)]
struct RegistryState {
    names: NameSet,
    capacity: usize,
    next_capacity: usize,
    overflow: bool,
}

/// Bounded set of the transaction names seen in the current cycle.
#[derive(Debug)]
pub struct TransactionRegistry {
    state: Mutex<RegistryState>,
}

impl TransactionRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                names: NameSet::default(),
                capacity,
                next_capacity: capacity,
                overflow: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits `name` into the current cycle.
    ///
    /// Returns `true` if the name was already registered or there was room
    /// for it, `false` (and flags the overflow) once the cycle is full.
    pub fn admit(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.names.contains(name) {
            return true;
        }
        if state.names.len() < state.capacity {
            state.names.insert(name.to_string());
            return true;
        }
        if !state.overflow {
            warn!(
                "Transaction name limit of {} reached, reporting new names as '{}'",
                state.capacity, OTHER_TRANSACTION_NAME
            );
        }
        state.overflow = true;
        false
    }

    /// Stages a new capacity, applied on the next [`reset`](Self::reset).
    pub fn set_capacity(&self, capacity: usize) {
        self.lock().next_capacity = capacity;
    }

    #[must_use]
    pub fn is_overflowing(&self) -> bool {
        self.lock().overflow
    }

    /// Starts a new cycle: clears the names and the overflow flag and applies
    /// the staged capacity. Returns whether the closed cycle overflowed.
    pub fn reset(&self) -> bool {
        let mut state = self.lock();
        state.names = NameSet::default();
        state.capacity = state.next_capacity;
        std::mem::take(&mut state.overflow)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

/// How a span's transaction is reported for the current cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Admitted by the registry; gets its own histogram and measurements.
    Named(String),
    /// Rejected because the registry is full; counted under "other".
    Other,
    /// No usable name; counted under "unknown" without consuming capacity.
    Unknown,
}

impl Classification {
    /// Transaction name used as the `TransactionName` tag of the measurements.
    #[must_use]
    pub fn transaction_name(&self) -> &str {
        match self {
            Classification::Named(name) => name,
            Classification::Other => OTHER_TRANSACTION_NAME,
            Classification::Unknown => UNKNOWN_TRANSACTION_NAME,
        }
    }
}

/// Derives a transaction name from an escaped URL path by keeping its first
/// three segments, e.g. `/a/b/c/d` becomes `/a/b/c`.
#[must_use]
pub fn transaction_from_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    // the empty segment before a leading slash is not counted
    let keep = if path.starts_with('/') {
        MAX_PATH_SEGMENTS_FOR_TRANSACTION_NAME + 1
    } else {
        MAX_PATH_SEGMENTS_FOR_TRANSACTION_NAME
    };
    path.split('/').take(keep).collect::<Vec<_>>().join("/")
}

/// Resolves the transaction identity of a span and admits it into `registry`.
///
/// An explicit name wins over the path; a span with neither is "unknown".
/// The "unknown" sentinel never consumes registry capacity.
pub fn classify(registry: &TransactionRegistry, transaction: &str, path: &str) -> Classification {
    let name = if !transaction.is_empty() {
        transaction.to_string()
    } else if !path.is_empty() {
        transaction_from_path(path)
    } else {
        return Classification::Unknown;
    };

    if name == UNKNOWN_TRANSACTION_NAME {
        Classification::Unknown
    } else if registry.admit(&name) {
        Classification::Named(name)
    } else {
        Classification::Other
    }
}
