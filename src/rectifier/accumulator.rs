//! Ordered holding buffer.

use super::record::EventRecord;
use crate::temporal::{TimeRange, Timestamp};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// A record together with its parsed sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Sort key.
    pub key: Timestamp,
    /// The record.
    pub record: EventRecord,
}

/// Accumulated records of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Number of records held.
    pub count: usize,
    /// Smallest and largest key held.
    pub range: TimeRange,
}

/// Records ordered by key; records with equal keys keep insertion order.
#[derive(Debug, Default)]
pub struct Accumulator {
    entries: VecDeque<Entry>,
}

impl Accumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after every entry with a key `<= key`.
    pub fn insert(&mut self, key: Timestamp, record: EventRecord) {
        // Producers mostly deliver in order.
        let at = match self.entries.back() {
            Some(last) if last.key > key => self.entries.partition_point(|e| e.key <= key),
            _ => self.entries.len(),
        };
        self.entries.insert(at, Entry { key, record });
    }

    /// Remove and return the prefix of entries with a key `<= cutoff`.
    pub fn take_eligible(&mut self, cutoff: Timestamp) -> Vec<Entry> {
        let end = self.entries.partition_point(|e| e.key <= cutoff);
        self.entries.drain(..end).collect()
    }

    /// Put back entries taken by [`take_eligible`](Self::take_eligible) but
    /// not consumed.
    ///
    /// `entries` must be in ascending order. They are placed ahead of held
    /// entries with equal keys, which arrived later.
    pub fn restore(&mut self, entries: Vec<Entry>) {
        let fits_in_front = match (entries.last(), self.entries.front()) {
            (Some(last), Some(first)) => last.key <= first.key,
            _ => true,
        };
        if fits_in_front {
            for entry in entries.into_iter().rev() {
                self.entries.push_front(entry);
            }
            return;
        }
        for entry in entries.into_iter().rev() {
            let at = self.entries.partition_point(|e| e.key < entry.key);
            self.entries.insert(at, entry);
        }
    }

    /// Number of held records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest and largest held key.
    pub fn range(&self) -> Option<TimeRange> {
        let first = self.entries.front()?;
        let last = self.entries.back()?;
        Some(TimeRange::new(first.key, last.key))
    }

    /// Held records grouped by stream id. Untagged records are grouped
    /// under the empty string.
    pub fn stream_stats(&self) -> BTreeMap<String, StreamStats> {
        let mut stats: BTreeMap<String, StreamStats> = BTreeMap::new();
        for entry in &self.entries {
            let id = entry.record.stream_id().unwrap_or_default();
            match stats.get_mut(id) {
                Some(s) => {
                    s.count += 1;
                    s.range.extend_to(entry.key);
                }
                None => {
                    stats.insert(
                        id.to_string(),
                        StreamStats {
                            count: 1,
                            range: TimeRange::at(entry.key),
                        },
                    );
                }
            }
        }
        stats
    }

    /// Iterate over held entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}
