use std::fmt::Display;
use std::io;

/// EmberDB errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The requested key has no visible version (or its latest visible
    /// version is a tombstone).
    KeyNotFound,
    /// An insert targeted a key that already exists.
    KeyAlreadyExists(String),
    /// A key exceeded [`KEY_SIZE`](crate::config::KEY_SIZE) bytes.
    ExceedMaxKeySize(String),
    /// An entry carried more than [`MAX_ATTRIBUTES`](crate::config::MAX_ATTRIBUTES) attributes.
    ExceedMaxAttributes,
    /// An entry's attribute data exceeded [`ENTRY_SIZE`](crate::config::ENTRY_SIZE) bytes,
    /// or its encoded form would not fit a data block.
    ExceedMaxEntrySize,
    /// An encoded value carried an unknown data-type tag.
    NoTypeFound(u8),
    /// A value's bytes do not match its declared data type.
    ParseValue,
    /// The transaction lost a conflict check and must be retried.
    TxnAbort,
    /// An SST file or WAL stream violated its framing.
    BadFormattedSst(String),
    /// A read returned fewer bytes than the format requires.
    ReadUnexpectedBytes(&'static str),
    /// A write persisted fewer bytes than were submitted.
    WriteUnexpectedBytes(String),
    /// An entry payload could not be decoded.
    DecodeEntry,
    /// A scan's start key ordered after its end key.
    InvalidKeyRange,
    /// The database has been closed.
    Closed,
    /// An IO error.
    Io(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::KeyAlreadyExists(key) => write!(f, "key {key:?} already exists"),
            Error::ExceedMaxKeySize(key) => write!(f, "key {key:?} exceeds max key size"),
            Error::ExceedMaxAttributes => write!(f, "entry exceeds max attribute count"),
            Error::ExceedMaxEntrySize => write!(f, "entry exceeds max entry size"),
            Error::NoTypeFound(tag) => write!(f, "no data type for tag {tag}"),
            Error::ParseValue => write!(f, "value bytes do not match declared type"),
            Error::TxnAbort => write!(f, "transaction aborted, retry"),
            Error::BadFormattedSst(msg) => write!(f, "bad formatted sst: {msg}"),
            Error::ReadUnexpectedBytes(what) => write!(f, "read unexpected byte count: {what}"),
            Error::WriteUnexpectedBytes(path) => {
                write!(f, "write unexpected byte count: {path}")
            }
            Error::DecodeEntry => write!(f, "entry decode failed"),
            Error::InvalidKeyRange => write!(f, "start key is greater than end key"),
            Error::Closed => write!(f, "database is closed"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
