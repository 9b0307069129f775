//! Row model and wire codec.
//!
//! An [`Entry`] is one committed version of a key: a commit timestamp, the
//! key itself, and a set of named, typed attributes. A deletion is an entry
//! whose attribute map is absent (a tombstone). The same encoding is used
//! verbatim in the WAL and inside SST data blocks:
//!
//! ```text
//! +--------------+------------------------------------------------+
//! | totalSize:u32| payload                                        |
//! +--------------+------------------------------------------------+
//!                | ts:u64 | keyLen:u8 | key | attribute*          |
//!                +------------------------------------------------+
//! attribute:     | nameLen:u8 | name | type:u8 | dataLen:u16 | data
//! ```
//!
//! All integers are little-endian. `totalSize` counts the payload only. An
//! entry that decodes with zero attributes is a tombstone; attribute order
//! within an entry is unspecified.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::config::{BLOCK_SIZE, ENTRY_SIZE, KEY_SIZE, MAX_ATTRIBUTES};
use crate::error::{Error, Result};

/// Tag identifying how a [`Value`]'s bytes are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Bool = 0,
    Int = 1,
    Uint = 2,
    Float = 3,
    String = 4,
    Bytes = 5,
    Tombstone = 6,
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(DataType::Bool),
            1 => Ok(DataType::Int),
            2 => Ok(DataType::Uint),
            3 => Ok(DataType::Float),
            4 => Ok(DataType::String),
            5 => Ok(DataType::Bytes),
            6 => Ok(DataType::Tombstone),
            _ => Err(Error::NoTypeFound(tag)),
        }
    }
}

/// A typed attribute value: a data-type tag plus its raw bytes.
///
/// Bool is one byte, Int/Uint/Float are 8 bytes little-endian, String and
/// Bytes carry their declared length.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub data_type: DataType,
    pub data: Vec<u8>,
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value {
            data_type: DataType::Bool,
            data: vec![v as u8],
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        let mut data = vec![0u8; 8];
        LittleEndian::write_u64(&mut data, v as u64);
        Value {
            data_type: DataType::Int,
            data,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        let mut data = vec![0u8; 8];
        LittleEndian::write_u64(&mut data, v);
        Value {
            data_type: DataType::Uint,
            data,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        let mut data = vec![0u8; 8];
        LittleEndian::write_u64(&mut data, v.to_bits());
        Value {
            data_type: DataType::Float,
            data,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value {
            data_type: DataType::String,
            data: v.as_bytes().to_vec(),
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value {
            data_type: DataType::String,
            data: v.into_bytes(),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value {
            data_type: DataType::Bytes,
            data: v,
        }
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value {
            data_type: DataType::Bytes,
            data: v.to_vec(),
        }
    }
}

/// A [`Value`] parsed back into its native representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Interprets the raw bytes according to the data-type tag.
    pub fn parse(&self) -> Result<Datum> {
        let data = &self.data;
        match self.data_type {
            DataType::Bool => match data.as_slice() {
                [0] => Ok(Datum::Bool(false)),
                [1] => Ok(Datum::Bool(true)),
                _ => Err(Error::ParseValue),
            },
            DataType::Int => {
                if data.len() != 8 {
                    return Err(Error::ParseValue);
                }
                Ok(Datum::Int(LittleEndian::read_u64(data) as i64))
            }
            DataType::Uint => {
                if data.len() != 8 {
                    return Err(Error::ParseValue);
                }
                Ok(Datum::Uint(LittleEndian::read_u64(data)))
            }
            DataType::Float => {
                if data.len() != 8 {
                    return Err(Error::ParseValue);
                }
                Ok(Datum::Float(f64::from_bits(LittleEndian::read_u64(data))))
            }
            DataType::String => String::from_utf8(data.clone())
                .map(Datum::String)
                .map_err(|_| Error::ParseValue),
            DataType::Bytes => Ok(Datum::Bytes(data.clone())),
            DataType::Tombstone => Err(Error::ParseValue),
        }
    }
}

/// The attribute map of a live entry.
pub type Attributes = HashMap<String, Value>;

/// One committed version of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub(crate) ts: u64,
    pub key: String,
    /// `None` marks the tombstone version.
    pub attrs: Option<Attributes>,
}

impl Entry {
    /// Builds a validated entry. The timestamp is stamped later by the
    /// oracle at commit time.
    pub(crate) fn new(ts: u64, key: &str, attrs: Option<Attributes>) -> Result<Entry> {
        if key.len() > KEY_SIZE {
            return Err(Error::ExceedMaxKeySize(key.to_string()));
        }
        if let Some(attrs) = &attrs {
            if attrs.len() > MAX_ATTRIBUTES {
                return Err(Error::ExceedMaxAttributes);
            }
            let mut total = 0;
            for (name, value) in attrs {
                // Names are framed with a u8 length.
                if name.len() > u8::MAX as usize {
                    return Err(Error::ExceedMaxAttributes);
                }
                total += value.data.len();
                if total > ENTRY_SIZE {
                    return Err(Error::ExceedMaxEntrySize);
                }
            }
        }
        Ok(Entry {
            ts,
            key: key.to_string(),
            attrs,
        })
    }

    /// Builds a validated tombstone version for `key`.
    pub(crate) fn tombstone(ts: u64, key: &str) -> Result<Entry> {
        Entry::new(ts, key, None)
    }

    /// The commit timestamp of this version.
    pub fn ts(&self) -> u64 {
        self.ts
    }

    pub fn is_tombstone(&self) -> bool {
        self.attrs.is_none()
    }
}

/// Encodes an entry as `totalSize` followed by the payload.
pub(crate) fn encode_entry(entry: &Entry) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);
    payload.write_u64::<LittleEndian>(entry.ts).unwrap();
    payload.push(entry.key.len() as u8);
    payload.extend_from_slice(entry.key.as_bytes());
    if let Some(attrs) = &entry.attrs {
        for (name, value) in attrs {
            payload.push(name.len() as u8);
            payload.extend_from_slice(name.as_bytes());
            payload.push(value.data_type as u8);
            payload
                .write_u16::<LittleEndian>(value.data.len() as u16)
                .unwrap();
            payload.extend_from_slice(&value.data);
        }
    }

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    buf.extend_from_slice(&payload);
    buf
}

/// Decodes one entry payload (everything after the `totalSize` prefix).
pub(crate) fn decode_entry(data: &[u8]) -> Result<Entry> {
    if data.len() < 9 {
        return Err(Error::DecodeEntry);
    }
    let ts = LittleEndian::read_u64(&data[..8]);
    let mut i = 8;

    let key_len = data[i] as usize;
    i += 1;
    if i + key_len > data.len() {
        return Err(Error::DecodeEntry);
    }
    let key = std::str::from_utf8(&data[i..i + key_len])
        .map_err(|_| Error::DecodeEntry)?
        .to_string();
    i += key_len;

    let mut attrs = Attributes::new();
    while i < data.len() {
        let name_len = data[i] as usize;
        i += 1;
        if i + name_len + 3 > data.len() {
            return Err(Error::DecodeEntry);
        }
        let name = std::str::from_utf8(&data[i..i + name_len])
            .map_err(|_| Error::DecodeEntry)?
            .to_string();
        i += name_len;

        let data_type = DataType::try_from(data[i])?;
        i += 1;
        let data_len = LittleEndian::read_u16(&data[i..i + 2]) as usize;
        i += 2;
        if i + data_len > data.len() {
            return Err(Error::DecodeEntry);
        }
        attrs.insert(
            name,
            Value {
                data_type,
                data: data[i..i + data_len].to_vec(),
            },
        );
        i += data_len;
    }

    Ok(Entry {
        ts,
        key,
        // Zero attributes is the tombstone encoding.
        attrs: if attrs.is_empty() { None } else { Some(attrs) },
    })
}

/// Decodes every entry from a run of `BLOCK_SIZE` data blocks. Within each
/// block an `entrySize == 0` sentinel marks the zero-padded tail.
pub(crate) fn decode_entries(data: &[u8]) -> Result<Vec<Entry>> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::BadFormattedSst(
            "data region is not a whole number of blocks".to_string(),
        ));
    }
    let mut entries = Vec::new();
    for block in data.chunks(BLOCK_SIZE) {
        let mut j = 0;
        while j + 4 <= block.len() {
            let entry_size = LittleEndian::read_u32(&block[j..j + 4]) as usize;
            if entry_size == 0 {
                break;
            }
            j += 4;
            if j + entry_size > block.len() {
                return Err(Error::BadFormattedSst(
                    "entry overruns its block".to_string(),
                ));
            }
            entries.push(decode_entry(&block[j..j + entry_size])?);
            j += entry_size;
        }
    }
    Ok(entries)
}
