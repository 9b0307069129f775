//! Packs a sorted run of entries into fixed-size data blocks.
//!
//! Blocks are `BLOCK_SIZE` bytes and zero-padded; an entry is never split
//! across two blocks, so a reader treats the first zero `entrySize` as the
//! end of a block. Alongside the data the packer produces the sparse index
//! (one entry per block recording its last key), a bloom filter over all
//! keys, and the run's key range.

use crate::config::BLOCK_SIZE;
use crate::entry::{encode_entry, Entry};
use crate::error::Result;

use super::bloom::Bloom;
use super::index::{KeyRange, SparseIndex};

pub(crate) struct PackedRun {
    pub data: Vec<u8>,
    pub index: SparseIndex,
    pub bloom: Bloom,
    pub key_range: KeyRange,
}

/// Packs entries pre-sorted by key ascending (timestamp ascending for
/// versions of the same key). The caller guarantees a non-empty slice.
pub(crate) fn pack_entries(entries: &[Entry]) -> Result<PackedRun> {
    debug_assert!(!entries.is_empty());

    let key_range = KeyRange::new(
        entries[0].key.clone(),
        entries[entries.len() - 1].key.clone(),
    );
    let mut bloom = Bloom::new(entries.len());
    let mut index = SparseIndex::new();

    let mut data = Vec::with_capacity(BLOCK_SIZE);
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut cursor = 0;
    let mut block_no = 0u32;
    let mut last_key = entries[0].key.as_str();

    for entry in entries {
        let bytes = encode_entry(entry);
        if cursor + bytes.len() > BLOCK_SIZE {
            // The entry would overflow: seal the current block.
            data.extend_from_slice(&block);
            index.push(last_key.to_string(), block_no);
            block.fill(0);
            cursor = 0;
            block_no += 1;
        }
        block[cursor..cursor + bytes.len()].copy_from_slice(&bytes);
        cursor += bytes.len();
        bloom.insert(&entry.key);
        last_key = entry.key.as_str();
    }

    data.extend_from_slice(&block);
    index.push(last_key.to_string(), block_no);

    Ok(PackedRun {
        data,
        index,
        bloom,
        key_range,
    })
}
