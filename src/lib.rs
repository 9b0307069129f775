//! EmberDB: an embedded key-value store whose rows are sets of named, typed
//! attributes, built on an LSM engine with WAL durability and optimistic
//! MVCC transactions.
//!
//! ```no_run
//! use emberdb::{Attributes, Db, Value};
//!
//! # fn main() -> emberdb::Result<()> {
//! let db = Db::open("./data")?;
//!
//! let mut attrs = Attributes::new();
//! attrs.insert("balance".to_string(), Value::from(100u64));
//! db.insert("alice", attrs)?;
//!
//! let row = db.read("alice", &["balance"])?;
//! assert!(row.attrs["balance"].is_some());
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod error;

mod api;
mod db;
mod flock;
mod lsm;
mod memtable;
mod oracle;
mod sstable;
mod txn;

pub use api::Row;
pub use config::DbConfig;
pub use db::Db;
pub use entry::{Attributes, DataType, Datum, Entry, Value};
pub use error::{Error, Result};
pub use txn::Txn;
