use std::path::PathBuf;

/// Maximum key length in bytes. Keys are framed with a u8 length.
pub const KEY_SIZE: usize = 255;

/// Maximum number of attributes per entry.
pub const MAX_ATTRIBUTES: usize = 64;

/// Maximum summed attribute data per entry, in bytes.
pub const ENTRY_SIZE: usize = 4096;

/// Size of one SST data block. Strictly larger than the worst-case encoded
/// entry, so an entry never spans two blocks.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Size of the SST header: five u64 section sizes.
pub const HEADER_SIZE: usize = 40;

/// Configuration for an EmberDB instance.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Directory holding the WALs and SST runs.
    pub dir: PathBuf,

    /// Memtable rotation threshold in encoded bytes (default: 4MB).
    pub memtable_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            memtable_size: 4 * 1024 * 1024,
        }
    }
}

impl DbConfig {
    /// Create a new config rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable rotation threshold.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }
}
