//! Database coordinator.
//!
//! A `Db` owns the oracle, two WAL-backed memtables in a ping-pong pair, the
//! LSM run set, and two long-lived background threads:
//!
//! - the **writer loop**, sole consumer of the write channel and sole
//!   mutator of the memtable pair: it appends each committed batch to the
//!   mutable table's WAL, rotates the pair when the mutable side fills, and
//!   replies to the committing transaction;
//! - the **flush loop**, sole consumer of rotated memtables: it drains a
//!   table into a new SST run and truncates its WAL only once the run is
//!   durable.
//!
//! Reads go straight through `Db` without the loops: mutable table, then
//! immutable table, then the LSM runs, all filtered by the reader's start
//! timestamp.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use itertools::Itertools;

use crate::config::{DbConfig, KEY_SIZE};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::flock::DirLock;
use crate::lsm::Lsm;
use crate::memtable::MemTable;
use crate::oracle::Oracle;
use crate::sstable::KeyRange;

const FLUSH_RETRIES: u32 = 3;

/// One committed batch on its way to the writer loop, carrying the channel
/// the committing transaction blocks on.
pub(crate) struct WriteRequest {
    pub entries: Vec<Entry>,
    pub reply: Sender<Result<()>>,
}

struct TablePair {
    mutable: Arc<MemTable>,
    immutable: Arc<MemTable>,
}

pub(crate) struct Shared {
    oracle: Oracle,
    tables: RwLock<TablePair>,
    lsm: Lsm,
    config: DbConfig,
}

/// An embedded EmberDB instance.
pub struct Db {
    shared: Arc<Shared>,
    close_tx: Sender<()>,
    writer: Option<JoinHandle<()>>,
    flusher: Option<JoinHandle<()>>,
    _lock: DirLock,
}

impl Db {
    /// Opens (or creates) a database under `dir` with default configuration.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Db> {
        Self::open_with_config(DbConfig::new(dir))
    }

    /// Opens a database, recovering both WALs and the run set. The oracle
    /// resumes past every timestamp that was ever durable.
    pub fn open_with_config(config: DbConfig) -> Result<Db> {
        fs::create_dir_all(&config.dir)?;
        let lock = DirLock::acquire(&config.dir)?;

        let lsm = Lsm::open(&config.dir)?;
        let (memtable1, max_ts1) = MemTable::open(&config.dir, "1")?;
        let (memtable2, max_ts2) = MemTable::open(&config.dir, "2")?;
        let next_ts = max_ts1.max(max_ts2).max(lsm.max_commit_ts()?) + 1;
        tracing::info!(next_ts, dir = %config.dir.display(), "opened database");

        let (write_tx, write_rx) = bounded(0);
        let (flush_tx, flush_rx) = bounded::<Arc<MemTable>>(0);
        let (close_tx, close_rx) = bounded(1);

        let memtable2 = Arc::new(memtable2);
        let shared = Arc::new(Shared {
            oracle: Oracle::new(next_ts, write_tx),
            tables: RwLock::new(TablePair {
                mutable: Arc::new(memtable1),
                immutable: memtable2.clone(),
            }),
            lsm,
            config,
        });

        let flusher = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("emberdb-flush".to_string())
                .spawn(move || flush_loop(shared, flush_rx))?
        };

        // A recovered immutable table holds data from before the crash;
        // flush it now so rotation never has to wait on it.
        if memtable2.size() > 0 {
            flush_tx.send(memtable2).map_err(|_| Error::Closed)?;
        }

        let writer = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("emberdb-writer".to_string())
                .spawn(move || writer_loop(shared, write_rx, flush_tx, close_rx))?
        };

        Ok(Db {
            shared,
            close_tx,
            writer: Some(writer),
            flusher: Some(flusher),
            _lock: lock,
        })
    }

    /// Signals the writer loop, waits for in-flight writes and pending
    /// flushes to finish, and releases the LSM.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let _ = self.close_tx.send(());
        writer
            .join()
            .map_err(|_| Error::Io("writer thread panicked".to_string()))?;
        if let Some(flusher) = self.flusher.take() {
            flusher
                .join()
                .map_err(|_| Error::Io("flush thread panicked".to_string()))?;
        }
        self.shared.lsm.close()
    }

    pub(crate) fn oracle(&self) -> &Oracle {
        &self.shared.oracle
    }

    /// Latest visible version of `key` at `ts`: mutable table, then
    /// immutable, then the runs. A tombstone anywhere surfaces as not found.
    pub(crate) fn read_at(&self, key: &str, ts: u64) -> Result<Entry> {
        if key.len() > KEY_SIZE {
            return Err(Error::ExceedMaxKeySize(key.to_string()));
        }
        let (mutable, immutable) = self.table_pair()?;
        if let Some(entry) = mutable.table.find(key, ts) {
            return visible(entry);
        }
        if let Some(entry) = immutable.table.find(key, ts) {
            return visible(entry);
        }
        if let Some(entry) = self.shared.lsm.read(key, ts)? {
            return visible(entry);
        }
        Err(Error::KeyNotFound)
    }

    /// All live keys in `[start, end]` at `ts`, merged across every layer,
    /// one latest version per key, sorted ascending.
    pub(crate) fn scan_at(&self, start: &str, end: &str, ts: u64) -> Result<Vec<Entry>> {
        if start.len() > KEY_SIZE {
            return Err(Error::ExceedMaxKeySize(start.to_string()));
        }
        if end.len() > KEY_SIZE {
            return Err(Error::ExceedMaxKeySize(end.to_string()));
        }
        if start > end {
            return Err(Error::InvalidKeyRange);
        }
        let range = KeyRange::new(start, end);

        let (mutable, immutable) = self.table_pair()?;
        let mut all = mutable.table.scan(&range, ts);
        all.extend(immutable.table.scan(&range, ts));
        all.extend(self.shared.lsm.scan(&range, ts)?);

        let merged = all
            .into_iter()
            .sorted_by(|a, b| (&a.key, a.ts()).cmp(&(&b.key, b.ts())))
            .coalesce(|a, b| if a.key == b.key { Ok(b) } else { Err((a, b)) })
            .filter(|entry| !entry.is_tombstone())
            .collect();
        Ok(merged)
    }

    fn table_pair(&self) -> Result<(Arc<MemTable>, Arc<MemTable>)> {
        let pair = self.shared.tables.read()?;
        Ok((pair.mutable.clone(), pair.immutable.clone()))
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "shutdown on drop failed");
        }
    }
}

fn visible(entry: Entry) -> Result<Entry> {
    if entry.is_tombstone() {
        Err(Error::KeyNotFound)
    } else {
        Ok(entry)
    }
}

/// Single serial consumer of committed batches. Total write order follows
/// the order requests are received, which the oracle makes equal to commit
/// timestamp order.
fn writer_loop(
    shared: Arc<Shared>,
    write_rx: Receiver<WriteRequest>,
    flush_tx: Sender<Arc<MemTable>>,
    close_rx: Receiver<()>,
) {
    loop {
        select! {
            recv(write_rx) -> req => {
                let Ok(req) = req else { break };
                handle_write(&shared, req, &flush_tx);
            }
            recv(close_rx) -> _signal => {
                // Drain commits already in flight, then stop. Dropping the
                // flush sender lets the flush loop run dry and exit.
                while let Ok(req) = write_rx.try_recv() {
                    handle_write(&shared, req, &flush_tx);
                }
                break;
            }
        }
    }
}

fn handle_write(shared: &Shared, req: WriteRequest, flush_tx: &Sender<Arc<MemTable>>) {
    let mutable = match shared.tables.read() {
        Ok(pair) => pair.mutable.clone(),
        Err(e) => {
            let _ = req.reply.send(Err(e.into()));
            return;
        }
    };
    let result = mutable.write(&req.entries);

    if result.is_ok() && mutable.size() > shared.config.memtable_size {
        let rotated = match shared.tables.write() {
            Ok(mut pair) => {
                // Rotation requires the previous flush to have emptied the
                // other table; otherwise keep filling and retry next write.
                if pair.immutable.size() == 0 {
                    let pair = &mut *pair;
                    std::mem::swap(&mut pair.mutable, &mut pair.immutable);
                    Some(pair.immutable.clone())
                } else {
                    None
                }
            }
            Err(e) => {
                let _ = req.reply.send(Err(e.into()));
                return;
            }
        };
        if let Some(full) = rotated {
            if flush_tx.send(full).is_err() {
                tracing::error!("flush loop gone, rotation dropped");
            }
        }
    }

    let _ = req.reply.send(result);
}

/// Single serial consumer of rotated memtables. A failed flush never
/// truncates the WAL: the data stays recoverable and the attempt is retried.
fn flush_loop(shared: Arc<Shared>, flush_rx: Receiver<Arc<MemTable>>) {
    for memtable in flush_rx.iter() {
        let mut attempt = 0;
        loop {
            match flush(&shared, &memtable) {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    tracing::error!(error = %e, attempt, "memtable flush failed");
                    if attempt >= FLUSH_RETRIES {
                        // Give up for now; the WAL is intact and replays on
                        // the next open.
                        break;
                    }
                    thread::sleep(Duration::from_millis(50 << attempt));
                }
            }
        }
    }
}

fn flush(shared: &Shared, memtable: &MemTable) -> Result<()> {
    let entries = memtable.table.inorder();
    if !entries.is_empty() {
        shared.lsm.write(&entries)?;
    }
    memtable.truncate()
}
