//! WAL-backed memtable.
//!
//! A memtable binds the in-memory [`VersionedTable`] to an append-only log
//! at a fixed path (`<dir>/memtables/<id>`). The WAL append plus fsync is
//! the only durable commit point: entries reach the in-memory table only
//! after their bytes are on disk, and the log is replayed into a fresh table
//! on open.
//!
//! The log is a plain sequence of encoded entries in the
//! [`entry`](crate::entry) framing (`totalSize:u32` + payload); there is no
//! separate record header. Truncation to zero happens after a successful
//! flush to an SST run, never before.

pub(crate) mod table;

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};

use crate::entry::{decode_entry, encode_entry, Entry};
use crate::error::{Error, Result};

pub(crate) use table::VersionedTable;

pub(crate) struct MemTable {
    pub(crate) table: VersionedTable,
    wal: Mutex<File>,
    path: PathBuf,
    size: AtomicUsize,
}

impl MemTable {
    /// Opens the memtable whose WAL lives at `<dir>/memtables/<id>`,
    /// creating an empty log or replaying an existing one. Returns the
    /// memtable and the largest commit timestamp observed during replay.
    pub fn open(dir: &Path, id: &str) -> Result<(MemTable, u64)> {
        let wal_dir = dir.join("memtables");
        std::fs::create_dir_all(&wal_dir)?;
        let path = wal_dir.join(id);

        let table = VersionedTable::new();
        let mut max_commit_ts = 0;
        let mut size = 0;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                file.sync_all()?;
                File::open(&wal_dir)?.sync_all()?;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let data = std::fs::read(&path)?;
                size = data.len();
                for entry in replay(&data)? {
                    max_commit_ts = max_commit_ts.max(entry.ts());
                    table.put(entry);
                }
            }
            Err(e) => return Err(e.into()),
        }

        let wal = OpenOptions::new().append(true).open(&path)?;
        Ok((
            MemTable {
                table,
                wal: Mutex::new(wal),
                path,
                size: AtomicUsize::new(size),
            },
            max_commit_ts,
        ))
    }

    /// Appends a batch to the WAL, fsyncs, then inserts into the table.
    /// Nothing is inserted when the append fails.
    pub fn write(&self, entries: &[Entry]) -> Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend_from_slice(&encode_entry(entry));
        }

        {
            let mut wal = self.wal.lock()?;
            let written = wal.write(&buf)?;
            if written != buf.len() {
                return Err(Error::WriteUnexpectedBytes(
                    self.path.display().to_string(),
                ));
            }
            wal.sync_all()?;
        }

        for entry in entries {
            self.table.put(entry.clone());
        }
        self.size.fetch_add(buf.len(), Ordering::SeqCst);
        Ok(())
    }

    /// Zeroes the WAL and resets the table. Called by the flush loop once
    /// the drained entries are durable in an SST run.
    pub fn truncate(&self) -> Result<()> {
        {
            let wal = self.wal.lock()?;
            wal.set_len(0)?;
            wal.sync_all()?;
        }
        self.table.clear();
        self.size.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Accumulated encoded size of the WAL in bytes.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }
}

/// Decodes a WAL image end to end. A framing error mid-stream is fatal;
/// recovery must not guess at a partially readable log.
fn replay(data: &[u8]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut i = 0;
    while i + 4 <= data.len() {
        let entry_size = LittleEndian::read_u32(&data[i..i + 4]) as usize;
        if entry_size == 0 {
            break;
        }
        i += 4;
        if i + entry_size > data.len() {
            return Err(Error::BadFormattedSst("wal entry overruns log".to_string()));
        }
        entries.push(decode_entry(&data[i..i + entry_size])?);
        i += entry_size;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Attributes, Value};
    use tempfile::TempDir;

    fn entry(ts: u64, key: &str, v: &str) -> Entry {
        let mut attrs = Attributes::new();
        attrs.insert("value".to_string(), Value::from(v));
        Entry::new(ts, key, Some(attrs)).unwrap()
    }

    #[test]
    fn test_write_then_find() {
        let dir = TempDir::new().unwrap();
        let (mt, max_ts) = MemTable::open(dir.path(), "1").unwrap();
        assert_eq!(max_ts, 0);

        mt.write(&[entry(1, "a", "one"), entry(2, "b", "two")])
            .unwrap();
        assert_eq!(mt.table.find("a", u64::MAX).unwrap().ts(), 1);
        assert_eq!(mt.table.find("b", u64::MAX).unwrap().ts(), 2);
        assert!(mt.size() > 0);
    }

    #[test]
    fn test_recover_replays_wal() {
        let dir = TempDir::new().unwrap();
        {
            let (mt, _) = MemTable::open(dir.path(), "1").unwrap();
            mt.write(&[entry(3, "a", "one")]).unwrap();
            mt.write(&[entry(7, "b", "two"), Entry::tombstone(8, "a").unwrap()])
                .unwrap();
        }

        let (mt, max_ts) = MemTable::open(dir.path(), "1").unwrap();
        assert_eq!(max_ts, 8);
        assert!(mt.table.find("a", u64::MAX).unwrap().is_tombstone());
        assert_eq!(mt.table.find("a", 7).unwrap().ts(), 3);
        assert_eq!(mt.table.find("b", u64::MAX).unwrap().ts(), 7);
        assert!(mt.size() > 0);
    }

    #[test]
    fn test_truncate_resets_everything() {
        let dir = TempDir::new().unwrap();
        let (mt, _) = MemTable::open(dir.path(), "1").unwrap();
        mt.write(&[entry(1, "a", "one")]).unwrap();

        mt.truncate().unwrap();
        assert!(mt.table.is_empty());
        assert_eq!(mt.size(), 0);

        // The WAL is empty again: a reopen finds nothing.
        drop(mt);
        let (mt, max_ts) = MemTable::open(dir.path(), "1").unwrap();
        assert_eq!(max_ts, 0);
        assert!(mt.table.is_empty());

        // And the handle still appends from offset zero.
        mt.write(&[entry(2, "c", "three")]).unwrap();
        drop(mt);
        let (mt, max_ts) = MemTable::open(dir.path(), "1").unwrap();
        assert_eq!(max_ts, 2);
        assert!(mt.table.find("c", u64::MAX).is_some());
    }

    #[test]
    fn test_recover_rejects_torn_log() {
        let dir = TempDir::new().unwrap();
        {
            let (mt, _) = MemTable::open(dir.path(), "1").unwrap();
            mt.write(&[entry(1, "a", "one")]).unwrap();
        }
        let path = dir.path().join("memtables").join("1");
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 3]).unwrap();

        assert!(MemTable::open(dir.path(), "1").is_err());
    }
}
