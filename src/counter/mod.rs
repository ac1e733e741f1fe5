//! Per-interval frequency table keyed by a 64-bit observation value.
//!
//! A [`CounterTable`] accumulates exact occurrence counts between two interval
//! boundaries. The owner reports it with [`write_report`] and then calls
//! [`CounterTable::clear`] to start the next interval from an empty table.

mod report;

pub use report::{ReportLine, write_report};

use std::collections::BTreeMap;

/// A single key together with the number of times it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub key: u64,
    pub count: u64,
}

#[derive(Debug, Default, Clone)]
pub struct CounterTable {
    counts: BTreeMap<u64, u64>,
}

impl CounterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one observation of `key`, inserting it with a count of 1 on first sight.
    pub fn increment(&mut self, key: u64) {
        let count = self.counts.entry(key).or_insert(0);
        *count = count.wrapping_add(1);
    }

    pub fn get(&self, key: u64) -> Option<u64> {
        self.counts.get(&key).copied()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts in the current interval.
    pub fn total(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |acc, count| acc.wrapping_add(*count))
    }

    /// Entries in ascending key order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = Entry> + '_ {
        self.counts
            .iter()
            .map(|(&key, &count)| Entry { key, count })
    }

    /// Report lines in ascending key order, each tagged with its tree level.
    pub fn report(&self) -> impl Iterator<Item = ReportLine> + '_ {
        let len = self.counts.len();
        self.entries()
            .enumerate()
            .map(move |(index, entry)| ReportLine::new(entry, report::balanced_depth(index, len)))
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
