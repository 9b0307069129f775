//! Optimistic transactions.
//!
//! A transaction snapshots the database at its start timestamp, buffers
//! writes locally, and validates at commit: if another transaction committed
//! a write to any key this one read after it started, the commit aborts and
//! the caller retries. A read-only scope simply never commits.

use std::collections::HashMap;

use crate::db::Db;
use crate::entry::{Attributes, Entry};
use crate::error::{Error, Result};

pub struct Txn<'db> {
    db: &'db Db,
    start_ts: u64,
    write_cache: HashMap<String, Entry>,
    read_set: HashMap<String, u64>,
}

impl Db {
    /// Starts a transaction reading at the latest committed snapshot.
    pub fn begin(&self) -> Txn<'_> {
        Txn {
            db: self,
            start_ts: self.oracle().request_start(),
            write_cache: HashMap::new(),
            read_set: HashMap::new(),
        }
    }

    /// Runs a read-only transaction scope. Nothing is committed.
    pub fn view_txn<T>(&self, f: impl FnOnce(&mut Txn) -> Result<T>) -> Result<T> {
        let mut txn = self.begin();
        f(&mut txn)
    }

    /// Runs a read-write transaction scope and commits it.
    pub fn update_txn<T>(&self, f: impl FnOnce(&mut Txn) -> Result<T>) -> Result<T> {
        let mut txn = self.begin();
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }
}

impl Txn<'_> {
    /// The snapshot timestamp this transaction reads at.
    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    /// Reads the latest version of `key` visible at the snapshot and records
    /// it in the read set. A tombstone surfaces as [`Error::KeyNotFound`].
    pub fn read(&mut self, key: &str) -> Result<Entry> {
        let entry = self.db.read_at(key, self.start_ts)?;
        self.read_set.insert(key.to_string(), entry.ts());
        Ok(entry)
    }

    /// Scans `[start, end]` at the snapshot, recording every returned key in
    /// the read set.
    pub fn scan(&mut self, start: &str, end: &str) -> Result<Vec<Entry>> {
        let entries = self.db.scan_at(start, end, self.start_ts)?;
        for entry in &entries {
            self.read_set.insert(entry.key.clone(), entry.ts());
        }
        Ok(entries)
    }

    /// Whether `key` has a live version at the snapshot. Counts as a read.
    pub fn exists(&mut self, key: &str) -> Result<bool> {
        match self.read(key) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Buffers a write. Validated now, visible to others only after commit.
    pub fn write(&mut self, key: &str, attrs: Attributes) -> Result<()> {
        let entry = Entry::new(0, key, Some(attrs))?;
        self.write_cache.insert(key.to_string(), entry);
        Ok(())
    }

    /// Buffers a deletion as a tombstone version.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let entry = Entry::tombstone(0, key)?;
        self.write_cache.insert(key.to_string(), entry);
        Ok(())
    }

    /// Validates and commits the buffered writes. An empty write cache
    /// commits trivially; [`Error::TxnAbort`] means retry with a new
    /// transaction.
    pub fn commit(&mut self) -> Result<()> {
        if self.write_cache.is_empty() {
            return Ok(());
        }
        let write_cache = std::mem::take(&mut self.write_cache);
        self.db
            .oracle()
            .commit(self.start_ts, &self.read_set, write_cache)?;
        Ok(())
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        // Lets the oracle garbage-collect committed write sets this
        // transaction could have conflicted with.
        self.db.oracle().release_start(self.start_ts);
    }
}
