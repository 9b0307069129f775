//! Bloom filter for fast negative membership on a run.
//!
//! Double hashing over two seeded hashers derives the k probe positions.
//! The serialized form is the bit array followed by a trailing byte holding
//! the hash count, so a reader can rebuild the filter from its size alone.

use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

const BITS_PER_KEY: usize = 10;
const NUM_HASHES: u8 = 7;

#[derive(Debug, Clone)]
pub struct Bloom {
    bits: Vec<u8>,
    num_hashes: u8,
}

impl Bloom {
    /// Sizes a filter for roughly `n` keys.
    pub fn new(n: usize) -> Self {
        let num_bits = (n * BITS_PER_KEY).max(64);
        Bloom {
            bits: vec![0u8; num_bits.div_ceil(8)],
            num_hashes: NUM_HASHES,
        }
    }

    fn probes(&self, key: &str) -> (u64, u64) {
        let mut h1 = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut h1);
        let mut h2 = std::collections::hash_map::DefaultHasher::new();
        // Second, independent stream: salt then key.
        0x5eedu32.hash(&mut h2);
        key.hash(&mut h2);
        (h1.finish(), h2.finish())
    }

    pub fn insert(&mut self, key: &str) {
        let (h1, h2) = self.probes(key);
        let num_bits = (self.bits.len() * 8) as u64;
        for i in 0..self.num_hashes as u64 {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Returns false only when the key is definitely absent.
    pub fn contains(&self, key: &str) -> bool {
        let (h1, h2) = self.probes(key);
        let num_bits = (self.bits.len() * 8) as u64;
        for i in 0..self.num_hashes as u64 {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % num_bits;
            if self.bits[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.bits.clone();
        buf.push(self.num_hashes);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::BadFormattedSst("bloom filter too short".to_string()));
        }
        let num_hashes = data[data.len() - 1];
        if num_hashes == 0 || num_hashes > 30 {
            return Err(Error::BadFormattedSst(
                "bloom filter hash count out of range".to_string(),
            ));
        }
        Ok(Bloom {
            bits: data[..data.len() - 1].to_vec(),
            num_hashes,
        })
    }
}
