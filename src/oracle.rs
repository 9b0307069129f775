//! Timestamp oracle: MVCC timestamp allocation and optimistic conflict
//! detection.
//!
//! One mutex guards the whole state, which makes the commit path a single
//! serialization point: conflict check, timestamp allocation, and the
//! handoff to the writer loop all happen under the lock, so commit order
//! equals timestamp order equals memtable insertion order.
//!
//! A transaction starts at `next - 1` (the latest committed view) without
//! consuming a timestamp. At commit, any committed transaction that wrote a
//! key in the committer's read set after the committer started forces an
//! abort (first committer wins).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Sender};

use crate::db::WriteRequest;
use crate::entry::Entry;
use crate::error::{Error, Result};

pub(crate) struct Oracle {
    inner: Mutex<OracleInner>,
    write_tx: Sender<WriteRequest>,
}

struct OracleInner {
    next_ts: u64,
    /// Write sets of committed transactions, kept while a live transaction
    /// could still conflict with them.
    committed: Vec<CommittedTxn>,
    /// Start timestamps of live transactions, refcounted.
    active: BTreeMap<u64, usize>,
}

struct CommittedTxn {
    ts: u64,
    keys: HashSet<String>,
}

impl Oracle {
    pub fn new(next_ts: u64, write_tx: Sender<WriteRequest>) -> Oracle {
        Oracle {
            inner: Mutex::new(OracleInner {
                next_ts,
                committed: Vec::new(),
                active: BTreeMap::new(),
            }),
            write_tx,
        }
    }

    /// Read timestamp for a new transaction: the latest committed view.
    /// Does not consume a timestamp.
    pub fn request_start(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let start_ts = inner.next_ts - 1;
        *inner.active.entry(start_ts).or_insert(0) += 1;
        start_ts
    }

    /// Drops a live transaction's claim on its start timestamp.
    pub fn release_start(&self, start_ts: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(count) = inner.active.get_mut(&start_ts) {
            *count -= 1;
            if *count == 0 {
                inner.active.remove(&start_ts);
            }
        }
    }

    /// Validates and commits a write cache. On success the batch is durable
    /// in the WAL and visible at the returned timestamp.
    pub fn commit(
        &self,
        start_ts: u64,
        read_set: &HashMap<String, u64>,
        write_cache: HashMap<String, Entry>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock()?;

        for committed in &inner.committed {
            if committed.ts > start_ts && read_set.keys().any(|k| committed.keys.contains(k)) {
                return Err(Error::TxnAbort);
            }
        }

        let commit_ts = inner.next_ts;
        inner.next_ts += 1;

        let mut entries: Vec<Entry> = write_cache.into_values().collect();
        for entry in &mut entries {
            entry.ts = commit_ts;
        }
        let keys: HashSet<String> = entries.iter().map(|e| e.key.clone()).collect();

        // Hand the stamped batch to the writer loop and wait for WAL
        // durability before recording the commit.
        let (reply_tx, reply_rx) = bounded(1);
        self.write_tx
            .send(WriteRequest {
                entries,
                reply: reply_tx,
            })
            .map_err(|_| Error::Closed)?;
        reply_rx.recv().map_err(|_| Error::Closed)??;

        inner.committed.push(CommittedTxn {
            ts: commit_ts,
            keys,
        });
        Self::collect_garbage(&mut inner);
        Ok(commit_ts)
    }

    /// Committed records older than every live transaction's start can no
    /// longer conflict with anything.
    fn collect_garbage(inner: &mut OracleInner) {
        match inner.active.keys().next().copied() {
            Some(oldest_start) => inner.committed.retain(|c| c.ts > oldest_start),
            None => inner.committed.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Attributes, Value};
    use std::thread;

    /// Stands in for the writer loop: acknowledges every request.
    fn stub_writer() -> (Sender<WriteRequest>, thread::JoinHandle<()>) {
        let (tx, rx) = bounded::<WriteRequest>(0);
        let handle = thread::spawn(move || {
            for req in rx.iter() {
                req.reply.send(Ok(())).ok();
            }
        });
        (tx, handle)
    }

    fn write_cache(keys: &[&str]) -> HashMap<String, Entry> {
        keys.iter()
            .map(|&k| {
                let mut attrs = Attributes::new();
                attrs.insert("v".to_string(), Value::from(1i64));
                (k.to_string(), Entry::new(0, k, Some(attrs)).unwrap())
            })
            .collect()
    }

    fn read_set(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|&(k, ts)| (k.to_string(), ts)).collect()
    }

    #[test]
    fn test_start_does_not_consume_timestamps() {
        let (tx, _handle) = stub_writer();
        let oracle = Oracle::new(5, tx);
        assert_eq!(oracle.request_start(), 4);
        assert_eq!(oracle.request_start(), 4);
    }

    #[test]
    fn test_commit_allocates_and_advances() {
        let (tx, _handle) = stub_writer();
        let oracle = Oracle::new(1, tx);

        let start = oracle.request_start();
        let ts = oracle
            .commit(start, &read_set(&[]), write_cache(&["a"]))
            .unwrap();
        assert_eq!(ts, 1);
        // A new transaction now observes the commit.
        assert_eq!(oracle.request_start(), 1);
    }

    #[test]
    fn test_conflicting_commit_aborts() {
        let (tx, _handle) = stub_writer();
        let oracle = Oracle::new(1, tx);

        // A starts and reads "a"; B commits a write to "a"; A must abort.
        let start_a = oracle.request_start();
        let start_b = oracle.request_start();
        oracle
            .commit(start_b, &read_set(&[]), write_cache(&["a"]))
            .unwrap();

        let result = oracle.commit(start_a, &read_set(&[("a", 0)]), write_cache(&["b"]));
        assert_eq!(result, Err(Error::TxnAbort));
    }

    #[test]
    fn test_disjoint_commits_proceed() {
        let (tx, _handle) = stub_writer();
        let oracle = Oracle::new(1, tx);

        let start_a = oracle.request_start();
        let start_b = oracle.request_start();
        oracle
            .commit(start_b, &read_set(&[]), write_cache(&["x"]))
            .unwrap();

        // A read "a", which B never wrote: no conflict.
        let result = oracle.commit(start_a, &read_set(&[("a", 0)]), write_cache(&["b"]));
        assert!(result.is_ok());
    }

    #[test]
    fn test_late_starter_sees_no_conflict() {
        let (tx, _handle) = stub_writer();
        let oracle = Oracle::new(1, tx);

        let start_b = oracle.request_start();
        oracle
            .commit(start_b, &read_set(&[]), write_cache(&["a"]))
            .unwrap();

        // A starts after B committed, so B's write is part of A's snapshot.
        let start_a = oracle.request_start();
        let result = oracle.commit(start_a, &read_set(&[("a", 1)]), write_cache(&["a"]));
        assert!(result.is_ok());
    }

    #[test]
    fn test_closed_writer_surfaces() {
        let (tx, rx) = bounded::<WriteRequest>(0);
        drop(rx);
        let oracle = Oracle::new(1, tx);

        let start = oracle.request_start();
        let result = oracle.commit(start, &read_set(&[]), write_cache(&["a"]));
        assert_eq!(result, Err(Error::Closed));
    }
}
