//! Ordered in-memory multi-version table.
//!
//! Backed by `crossbeam_skiplist::SkipMap` keyed by `(key, ts)`, which keeps
//! versions of one key adjacent and timestamp-ascending while supporting
//! lock-free concurrent readers alongside the single writer loop.

use std::ops::Bound;

use crossbeam_skiplist::SkipMap;

use crate::entry::Entry;
use crate::sstable::KeyRange;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct VersionKey {
    key: String,
    ts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct VersionedTable {
    map: SkipMap<VersionKey, Entry>,
}

impl VersionedTable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }

    /// Inserts a version; an existing entry with the same `(key, ts)` is
    /// replaced.
    pub fn put(&self, entry: Entry) {
        let version = VersionKey {
            key: entry.key.clone(),
            ts: entry.ts(),
        };
        self.map.insert(version, entry);
    }

    /// The version of `key` with the largest ts' <= `ts`. A tombstone is
    /// returned as an entry whose attribute map is absent.
    pub fn find(&self, key: &str, ts: u64) -> Option<Entry> {
        let low = VersionKey {
            key: key.to_string(),
            ts: 0,
        };
        let high = VersionKey {
            key: key.to_string(),
            ts,
        };
        self.map
            .range((Bound::Included(low), Bound::Included(high)))
            .next_back()
            .map(|e| e.value().clone())
    }

    /// Every key in `range` at its latest version with ts' <= `ts`,
    /// tombstones included, ordered by key.
    pub fn scan(&self, range: &KeyRange, ts: u64) -> Vec<Entry> {
        let low = VersionKey {
            key: range.start_key.clone(),
            ts: 0,
        };
        let high = VersionKey {
            key: range.end_key.clone(),
            ts: u64::MAX,
        };
        let mut out: Vec<Entry> = Vec::new();
        for item in self.map.range((Bound::Included(low), Bound::Included(high))) {
            let entry = item.value();
            if entry.ts() > ts {
                continue;
            }
            match out.last_mut() {
                Some(last) if last.key == entry.key => *last = entry.clone(),
                _ => out.push(entry.clone()),
            }
        }
        out
    }

    /// Drains a snapshot of every version, key ascending and timestamp
    /// ascending within a key, ready for the block packer.
    pub fn inorder(&self) -> Vec<Entry> {
        self.map.iter().map(|e| e.value().clone()).collect()
    }

    pub fn clear(&self) {
        while self.map.pop_front().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Attributes, Value};

    fn entry(ts: u64, key: &str, v: i64) -> Entry {
        let mut attrs = Attributes::new();
        attrs.insert("v".to_string(), Value::from(v));
        Entry::new(ts, key, Some(attrs)).unwrap()
    }

    #[test]
    fn test_find_picks_latest_visible_version() {
        let table = VersionedTable::new();
        table.put(entry(1, "k", 10));
        table.put(entry(5, "k", 50));
        table.put(entry(9, "k", 90));

        assert!(table.find("k", 0).is_none());
        assert_eq!(table.find("k", 1).unwrap().ts(), 1);
        assert_eq!(table.find("k", 4).unwrap().ts(), 1);
        assert_eq!(table.find("k", 5).unwrap().ts(), 5);
        assert_eq!(table.find("k", u64::MAX).unwrap().ts(), 9);
        assert!(table.find("other", u64::MAX).is_none());
    }

    #[test]
    fn test_put_replaces_same_version() {
        let table = VersionedTable::new();
        table.put(entry(3, "k", 1));
        table.put(entry(3, "k", 2));
        let found = table.find("k", 3).unwrap();
        assert_eq!(
            found.attrs.unwrap()["v"],
            Value::from(2i64)
        );
    }

    #[test]
    fn test_find_surfaces_tombstone() {
        let table = VersionedTable::new();
        table.put(entry(1, "k", 10));
        table.put(Entry::tombstone(2, "k").unwrap());

        let found = table.find("k", u64::MAX).unwrap();
        assert!(found.is_tombstone());
        // The live version is still visible at its own timestamp.
        assert!(!table.find("k", 1).unwrap().is_tombstone());
    }

    #[test]
    fn test_scan_latest_per_key() {
        let table = VersionedTable::new();
        table.put(entry(1, "a", 1));
        table.put(entry(4, "a", 2));
        table.put(entry(2, "b", 3));
        table.put(Entry::tombstone(3, "c").unwrap());
        table.put(entry(9, "d", 4));

        let range = KeyRange::new("a", "c");
        let result = table.scan(&range, 5);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].key, "a");
        assert_eq!(result[0].ts(), 4);
        assert_eq!(result[1].key, "b");
        assert!(result[2].is_tombstone());

        // Older snapshot sees the older version of "a" and no "c".
        let result = table.scan(&range, 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].ts(), 1);
    }

    #[test]
    fn test_inorder_and_clear() {
        let table = VersionedTable::new();
        table.put(entry(2, "b", 1));
        table.put(entry(1, "a", 2));
        table.put(entry(3, "a", 3));

        let drained = table.inorder();
        let versions: Vec<(&str, u64)> =
            drained.iter().map(|e| (e.key.as_str(), e.ts())).collect();
        assert_eq!(versions, vec![("a", 1), ("a", 3), ("b", 2)]);

        table.clear();
        assert!(table.is_empty());
    }
}
