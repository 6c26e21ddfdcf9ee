//! Bounded record of log entries already turned into events.

use crate::api::types::ActivityLogEntry;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

/// Ids of log entries already emitted (or primed) for one lock.
///
/// Ids are kept in insertion order and the oldest are evicted once the
/// capacity is reached. The newest server timestamp among evicted entries is
/// kept as a watermark: anything at or before it counts as seen, so an
/// evicted entry that reappears in a fetch is never emitted again.
#[derive(Debug, Clone)]
pub struct SeenEntrySet {
    capacity: usize,
    ids: HashSet<String>,
    order: VecDeque<(String, DateTime<Utc>)>,
    watermark: Option<DateTime<Utc>>,
}

impl SeenEntrySet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: HashSet::new(),
            order: VecDeque::new(),
            watermark: None,
        }
    }

    /// Whether this entry was already emitted or primed.
    pub fn contains(&self, entry: &ActivityLogEntry) -> bool {
        if self.ids.contains(&entry.id) {
            return true;
        }
        matches!(self.watermark, Some(mark) if entry.date <= mark)
    }

    /// Record an entry. Returns false when it was already present.
    pub fn insert(&mut self, entry: &ActivityLogEntry) -> bool {
        if self.contains(entry) {
            return false;
        }

        self.ids.insert(entry.id.clone());
        self.order.push_back((entry.id.clone(), entry.date));

        while self.order.len() > self.capacity {
            if let Some((id, date)) = self.order.pop_front() {
                self.ids.remove(&id);
                self.watermark = Some(match self.watermark {
                    Some(mark) if mark > date => mark,
                    _ => date,
                });
            }
        }

        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(id: &str, secs: i64) -> ActivityLogEntry {
        ActivityLogEntry {
            id: id.to_string(),
            smartlock_id: 1,
            action: 1,
            trigger: 255,
            name: String::new(),
            date: Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap() + Duration::seconds(secs),
            source: 1,
            auth_id: String::new(),
            state: 0,
        }
    }

    #[test]
    fn test_insert_and_contains() {
        let mut seen = SeenEntrySet::new(10);

        assert!(seen.insert(&entry("a", 0)));
        assert!(!seen.insert(&entry("a", 0)));
        assert!(seen.contains(&entry("a", 0)));
        assert!(!seen.contains(&entry("b", 1)));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_eviction_keeps_evicted_entries_seen() {
        let mut seen = SeenEntrySet::new(2);
        seen.insert(&entry("a", 0));
        seen.insert(&entry("b", 10));
        seen.insert(&entry("c", 20));

        assert_eq!(seen.len(), 2);
        assert_eq!(seen.watermark(), Some(entry("a", 0).date));
        // Evicted, but covered by the watermark.
        assert!(seen.contains(&entry("a", 0)));
        assert!(!seen.insert(&entry("a", 0)));
        // Newer than the watermark and never recorded.
        assert!(!seen.contains(&entry("d", 30)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let seen = SeenEntrySet::new(0);
        assert_eq!(seen.capacity(), 1);
        assert!(seen.is_empty());
    }
}
