//! Latest readings, shared between the poller and its observers
//!
//! The poller is the only writer. Each cycle it builds a fresh
//! [`ReadingsSnapshot`] and swaps it in as a whole, so readers holding the
//! previous `Arc` keep a complete, consistent view.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sensor::Reading;

/// Readings of the most recently completed cycle, keyed by sensor name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReadingsSnapshot {
    readings: BTreeMap<String, Reading>,
}

impl ReadingsSnapshot {
    pub fn get(&self, name: &str) -> Option<&Reading> {
        self.readings.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Reading)> {
        self.readings.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.readings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = &Reading> {
        self.readings
            .values()
            .filter(|reading| reading.outcome.is_success())
    }
}

impl FromIterator<Reading> for ReadingsSnapshot {
    fn from_iter<T: IntoIterator<Item = Reading>>(iter: T) -> Self {
        Self {
            readings: iter
                .into_iter()
                .map(|reading| (reading.name.clone(), reading))
                .collect(),
        }
    }
}

const NO_READING: i64 = i64::MIN;

/// Owner of the current snapshot and the last successful reading time
#[derive(Debug)]
pub struct ReadingsStore {
    current: ArcSwap<ReadingsSnapshot>,
    last_reading_ms: AtomicI64,
}

impl Default for ReadingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingsStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ReadingsSnapshot::default()),
            last_reading_ms: AtomicI64::new(NO_READING),
        }
    }

    /// The latest complete snapshot
    pub fn snapshot(&self) -> Arc<ReadingsSnapshot> {
        self.current.load_full()
    }

    /// Replace the snapshot. Bumps the last reading time if any sensor succeeded.
    pub fn replace(&self, snapshot: ReadingsSnapshot) -> Arc<ReadingsSnapshot> {
        if let Some(latest) = snapshot.successes().map(|r| r.polled_at).max() {
            self.last_reading_ms
                .fetch_max(latest.timestamp_millis(), Ordering::AcqRel);
        }

        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());
        snapshot
    }

    pub fn last_reading(&self) -> Option<DateTime<Utc>> {
        match self.last_reading_ms.load(Ordering::Acquire) {
            NO_READING => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}
