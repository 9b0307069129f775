//! On-disk SST run: creation, opening, point reads and range reads.
//!
//! ## File layout
//!
//! ```text
//! +--------------------------+
//! | Header (40 bytes)        |  five u64 LE section sizes:
//! +--------------------------+  data, index, bloom, range bloom, key range
//! | Data blocks (BLOCK_SIZE) |
//! +--------------------------+
//! | Sparse index             |
//! +--------------------------+
//! | Bloom filter             |
//! +--------------------------+
//! | Range-key bloom (unused) |
//! +--------------------------+
//! | Key-range trailer        |
//! +--------------------------+
//! ```
//!
//! A run is immutable once created. The index, bloom filter and key range
//! are held in memory; data blocks are read on demand at
//! `HEADER_SIZE + blockNo * BLOCK_SIZE`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::config::{BLOCK_SIZE, HEADER_SIZE};
use crate::entry::{decode_entries, Entry};
use crate::error::{Error, Result};

use super::block::pack_entries;
use super::bloom::Bloom;
use super::index::{KeyRange, SparseIndex};

pub(crate) struct Run {
    file: File,
    id: u64,
    index: SparseIndex,
    bloom: Bloom,
    key_range: KeyRange,
}

fn run_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:08}"))
}

impl Run {
    /// Packs `entries` (sorted by key asc, ts asc) into a new run file.
    /// Returns only after the file and its directory are durable.
    pub(crate) fn create(dir: &Path, id: u64, entries: &[Entry]) -> Result<Run> {
        let packed = pack_entries(entries)?;
        let index_bytes = packed.index.encode();
        let bloom_bytes = packed.bloom.encode();
        let range_bytes = packed.key_range.encode();

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header
            .write_u64::<LittleEndian>(packed.data.len() as u64)
            .unwrap();
        header
            .write_u64::<LittleEndian>(index_bytes.len() as u64)
            .unwrap();
        header
            .write_u64::<LittleEndian>(bloom_bytes.len() as u64)
            .unwrap();
        // Range-key bloom slot, unused in the single-key form.
        header.write_u64::<LittleEndian>(0).unwrap();
        header
            .write_u64::<LittleEndian>(range_bytes.len() as u64)
            .unwrap();

        let path = run_path(dir, id);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&header)?;
        file.write_all(&packed.data)?;
        file.write_all(&index_bytes)?;
        file.write_all(&bloom_bytes)?;
        file.write_all(&range_bytes)?;
        file.sync_all()?;
        File::open(dir)?.sync_all()?;

        Ok(Run {
            file: File::open(&path)?,
            id,
            index: packed.index,
            bloom: packed.bloom,
            key_range: packed.key_range,
        })
    }

    /// Opens an existing run, loading header, index, bloom and key range.
    pub(crate) fn open(dir: &Path, id: u64) -> Result<Run> {
        let mut file = File::open(run_path(dir, id))?;

        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)
            .map_err(|_| Error::ReadUnexpectedBytes("sst header"))?;
        let data_size = LittleEndian::read_u64(&header[0..8]);
        let index_size = LittleEndian::read_u64(&header[8..16]);
        let bloom_size = LittleEndian::read_u64(&header[16..24]);
        let range_bloom_size = LittleEndian::read_u64(&header[24..32]);
        let key_range_size = LittleEndian::read_u64(&header[32..40]);

        if data_size % BLOCK_SIZE as u64 != 0 {
            return Err(Error::BadFormattedSst(
                "data size is not block aligned".to_string(),
            ));
        }
        let expected =
            HEADER_SIZE as u64 + data_size + index_size + bloom_size + range_bloom_size
                + key_range_size;
        if file.metadata()?.len() != expected {
            return Err(Error::BadFormattedSst(
                "file length does not match header".to_string(),
            ));
        }

        file.seek(SeekFrom::Start(HEADER_SIZE as u64 + data_size))?;
        let mut index_bytes = vec![0u8; index_size as usize];
        file.read_exact(&mut index_bytes)
            .map_err(|_| Error::ReadUnexpectedBytes("sparse index"))?;
        let index = SparseIndex::decode(&index_bytes)?;

        let mut bloom_bytes = vec![0u8; bloom_size as usize];
        file.read_exact(&mut bloom_bytes)
            .map_err(|_| Error::ReadUnexpectedBytes("bloom filter"))?;
        let bloom = Bloom::decode(&bloom_bytes)?;

        file.seek(SeekFrom::Current(range_bloom_size as i64))?;
        let mut range_bytes = vec![0u8; key_range_size as usize];
        file.read_exact(&mut range_bytes)
            .map_err(|_| Error::ReadUnexpectedBytes("key range"))?;
        let key_range = KeyRange::decode(&range_bytes)?;

        Ok(Run {
            file,
            id,
            index,
            bloom,
            key_range,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key_range(&self) -> &KeyRange {
        &self.key_range
    }

    fn read_block(&self, block_no: u32) -> Result<Vec<u8>> {
        let offset = HEADER_SIZE as u64 + block_no as u64 * BLOCK_SIZE as u64;
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|_| Error::ReadUnexpectedBytes("data block"))?;
        Ok(buf)
    }

    /// Latest version of `key` with ts' <= `ts`, or None when this run
    /// cannot answer. Tombstones are returned as entries.
    pub(crate) fn get(&self, key: &str, ts: u64) -> Result<Option<Entry>> {
        if !self.bloom.contains(key) || !self.key_range.contains(key) {
            return Ok(None);
        }
        let Some(mut idx) = self.index.seek(key) else {
            return Ok(None);
        };

        let mut best: Option<Entry> = None;
        while let Some(block_no) = self.index.block_no(idx) {
            let entries = decode_entries(&self.read_block(block_no)?)?;
            // Versions of the block's last key may continue in the next block.
            let spills = entries.last().is_some_and(|e| e.key == key);
            for entry in entries {
                if entry.key == key && entry.ts <= ts {
                    // Versions are stored ts-ascending.
                    best = Some(entry);
                }
            }
            if !spills {
                break;
            }
            idx += 1;
        }
        Ok(best)
    }

    /// All keys within `range`, each at its latest version with ts' <= `ts`.
    /// Tombstones are included; the caller merges layers before filtering.
    pub(crate) fn scan(&self, range: &KeyRange, ts: u64) -> Result<Vec<Entry>> {
        if !self.key_range.intersects(range) {
            return Ok(Vec::new());
        }
        let Some(mut idx) = self.index.seek(&range.start_key) else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Entry> = Vec::new();
        while let Some(block_no) = self.index.block_no(idx) {
            let entries = decode_entries(&self.read_block(block_no)?)?;
            if entries
                .first()
                .is_some_and(|e| e.key.as_str() > range.end_key.as_str())
            {
                break;
            }
            for entry in entries {
                if !range.contains(&entry.key) || entry.ts > ts {
                    continue;
                }
                match out.last_mut() {
                    // Same key again: a newer visible version replaces it.
                    Some(last) if last.key == entry.key => *last = entry,
                    _ => out.push(entry),
                }
            }
            idx += 1;
        }
        Ok(out)
    }

    /// The largest commit timestamp stored in this run. Used once at open to
    /// seed the oracle past flushed-and-truncated entries.
    pub(crate) fn max_commit_ts(&self) -> Result<u64> {
        let mut max_ts = 0;
        for block_no in 0..self.index.len() as u32 {
            for entry in decode_entries(&self.read_block(block_no)?)? {
                max_ts = max_ts.max(entry.ts);
            }
        }
        Ok(max_ts)
    }
}
