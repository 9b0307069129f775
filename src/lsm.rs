//! LSM facade over the set of on-disk runs.
//!
//! Runs live under `<dir>/lsm/<run-id>` and are kept newest-first; a point
//! read stops at the first run that answers, a scan unions every run whose
//! key range intersects the query. New runs come from the flush loop, which
//! hands over a drained memtable already sorted for the block packer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use itertools::Itertools;

use crate::entry::Entry;
use crate::error::Result;
use crate::sstable::{KeyRange, Run};

pub(crate) struct Lsm {
    dir: PathBuf,
    /// Newest first.
    runs: RwLock<Vec<Arc<Run>>>,
    next_id: AtomicU64,
}

impl Lsm {
    pub fn open(dir: &Path) -> Result<Lsm> {
        let lsm_dir = dir.join("lsm");
        fs::create_dir_all(&lsm_dir)?;

        let mut ids = Vec::new();
        for dirent in fs::read_dir(&lsm_dir)? {
            let name = dirent?.file_name();
            if let Some(id) = name.to_str().and_then(|s| s.parse::<u64>().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut runs = Vec::with_capacity(ids.len());
        for id in &ids {
            runs.push(Arc::new(Run::open(&lsm_dir, *id)?));
        }
        tracing::debug!(runs = runs.len(), "opened lsm");

        let next_id = ids.first().map_or(1, |newest| newest + 1);
        Ok(Lsm {
            dir: lsm_dir,
            runs: RwLock::new(runs),
            next_id: AtomicU64::new(next_id),
        })
    }

    /// Largest commit timestamp on disk. The writer loop is serial, so runs
    /// are produced in timestamp order and the newest run bounds them all.
    pub fn max_commit_ts(&self) -> Result<u64> {
        let newest = self.runs.read()?.first().cloned();
        match newest {
            Some(run) => run.max_commit_ts(),
            None => Ok(0),
        }
    }

    /// Persists a drained memtable as one new run. The run joins the set
    /// only after its file and directory are durable.
    pub fn write(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let run = Run::create(&self.dir, id, entries)?;
        tracing::debug!(id, entries = entries.len(), "wrote run");
        self.runs.write()?.insert(0, Arc::new(run));
        Ok(())
    }

    /// Latest version of `key` with ts' <= `ts` from the newest run that
    /// answers. Tombstones count as answers.
    pub fn read(&self, key: &str, ts: u64) -> Result<Option<Entry>> {
        let runs = self.runs.read()?.clone();
        for run in runs {
            if let Some(entry) = run.get(key, ts)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Union of every intersecting run's scan, deduplicated per key keeping
    /// the largest timestamp. Tombstones are included.
    pub fn scan(&self, range: &KeyRange, ts: u64) -> Result<Vec<Entry>> {
        let runs = self.runs.read()?.clone();
        let mut per_run = Vec::new();
        for run in runs {
            if run.key_range().intersects(range) {
                per_run.push(run.scan(range, ts)?);
            }
        }
        let merged = per_run
            .into_iter()
            .kmerge_by(|a, b| (&a.key, a.ts()) < (&b.key, b.ts()))
            .coalesce(|a, b| if a.key == b.key { Ok(b) } else { Err((a, b)) })
            .collect();
        Ok(merged)
    }

    /// Quiesces reads and releases every run's file handle.
    pub fn close(&self) -> Result<()> {
        self.runs.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Attributes, Value};
    use tempfile::TempDir;

    fn entry(ts: u64, key: &str, v: i64) -> Entry {
        let mut attrs = Attributes::new();
        attrs.insert("v".to_string(), Value::from(v));
        Entry::new(ts, key, Some(attrs)).unwrap()
    }

    #[test]
    fn test_newest_run_wins() {
        let dir = TempDir::new().unwrap();
        let lsm = Lsm::open(dir.path()).unwrap();

        lsm.write(&[entry(1, "a", 1), entry(2, "b", 2)]).unwrap();
        lsm.write(&[entry(3, "a", 3)]).unwrap();

        let found = lsm.read("a", u64::MAX).unwrap().unwrap();
        assert_eq!(found.ts(), 3);
        // The older run still answers for keys the newer one lacks.
        assert_eq!(lsm.read("b", u64::MAX).unwrap().unwrap().ts(), 2);
        assert!(lsm.read("c", u64::MAX).unwrap().is_none());
    }

    #[test]
    fn test_scan_unions_and_dedups() {
        let dir = TempDir::new().unwrap();
        let lsm = Lsm::open(dir.path()).unwrap();

        lsm.write(&[entry(1, "a", 1), entry(2, "c", 2)]).unwrap();
        lsm.write(&[entry(3, "b", 3), entry(4, "c", 4)]).unwrap();

        let result = lsm.scan(&KeyRange::new("a", "z"), u64::MAX).unwrap();
        let versions: Vec<(&str, u64)> =
            result.iter().map(|e| (e.key.as_str(), e.ts())).collect();
        assert_eq!(versions, vec![("a", 1), ("b", 3), ("c", 4)]);
    }

    #[test]
    fn test_tombstone_shadows_older_run() {
        let dir = TempDir::new().unwrap();
        let lsm = Lsm::open(dir.path()).unwrap();

        lsm.write(&[entry(1, "a", 1)]).unwrap();
        lsm.write(&[Entry::tombstone(2, "a").unwrap()]).unwrap();

        let found = lsm.read("a", u64::MAX).unwrap().unwrap();
        assert!(found.is_tombstone());
    }

    #[test]
    fn test_reopen_recovers_runs() {
        let dir = TempDir::new().unwrap();
        {
            let lsm = Lsm::open(dir.path()).unwrap();
            lsm.write(&[entry(5, "a", 1)]).unwrap();
            lsm.write(&[entry(9, "b", 2)]).unwrap();
        }

        let lsm = Lsm::open(dir.path()).unwrap();
        assert_eq!(lsm.max_commit_ts().unwrap(), 9);
        assert_eq!(lsm.read("a", u64::MAX).unwrap().unwrap().ts(), 5);

        // A run written after reopen gets a fresh id and stays newest.
        lsm.write(&[entry(11, "a", 3)]).unwrap();
        assert_eq!(lsm.read("a", u64::MAX).unwrap().unwrap().ts(), 11);
    }
}
