//! Sparse index and key-range trailer for SST runs.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// One index entry per data block, recording the block's **last** key:
/// `[keyLen:u8][key][blockNo:u32 LE]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseIndex {
    entries: Vec<(String, u32)>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, last_key: String, block_no: u32) {
        self.entries.push((last_key, block_no));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first block whose recorded (last) key is >= `key`, i.e.
    /// the only block that can contain `key`. `None` when the key orders
    /// after every block.
    pub fn seek(&self, key: &str) -> Option<usize> {
        let idx = self
            .entries
            .partition_point(|(last, _)| last.as_str() < key);
        (idx < self.entries.len()).then_some(idx)
    }

    pub fn block_no(&self, idx: usize) -> Option<u32> {
        self.entries.get(idx).map(|(_, no)| *no)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (key, block_no) in &self.entries {
            buf.push(key.len() as u8);
            buf.extend_from_slice(key.as_bytes());
            buf.write_u32::<LittleEndian>(*block_no).unwrap();
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let key_len = data[i] as usize;
            i += 1;
            if i + key_len + 4 > data.len() {
                return Err(Error::BadFormattedSst(
                    "truncated sparse index entry".to_string(),
                ));
            }
            let key = std::str::from_utf8(&data[i..i + key_len])
                .map_err(|_| Error::BadFormattedSst("index key is not utf-8".to_string()))?
                .to_string();
            i += key_len;
            let block_no = LittleEndian::read_u32(&data[i..i + 4]);
            i += 4;
            entries.push((key, block_no));
        }
        Ok(Self { entries })
    }
}

/// The `(startKey, endKey)` pair stored in a run's trailer, used to prune
/// point reads and scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start_key: String,
    pub end_key: String,
}

impl KeyRange {
    pub fn new(start_key: impl Into<String>, end_key: impl Into<String>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.start_key.as_str() <= key && key <= self.end_key.as_str()
    }

    pub fn intersects(&self, other: &KeyRange) -> bool {
        self.start_key <= other.end_key && other.start_key <= self.end_key
    }

    /// `[startKeyLen:u8][startKey][endKeyLen:u8][endKey]`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.start_key.len() + self.end_key.len());
        buf.push(self.start_key.len() as u8);
        buf.extend_from_slice(self.start_key.as_bytes());
        buf.push(self.end_key.len() as u8);
        buf.extend_from_slice(self.end_key.as_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let err = || Error::BadFormattedSst("truncated key range".to_string());
        let mut i = 0;
        let start_len = *data.first().ok_or_else(err)? as usize;
        i += 1;
        if i + start_len > data.len() {
            return Err(err());
        }
        let start_key = std::str::from_utf8(&data[i..i + start_len])
            .map_err(|_| err())?
            .to_string();
        i += start_len;
        let end_len = *data.get(i).ok_or_else(err)? as usize;
        i += 1;
        if i + end_len > data.len() {
            return Err(err());
        }
        let end_key = std::str::from_utf8(&data[i..i + end_len])
            .map_err(|_| err())?
            .to_string();
        Ok(Self { start_key, end_key })
    }
}
