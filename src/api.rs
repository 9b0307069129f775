//! Row-level convenience API with attribute projection.
//!
//! These helpers wrap one transaction per call and shape the result for the
//! caller: a read or scan takes the list of attribute names the caller wants
//! and returns exactly those names, with `None` standing in for attributes
//! the row does not carry. Projection happens on the already-fetched entry;
//! the core is never queried twice.

use std::collections::HashMap;

use crate::config::KEY_SIZE;
use crate::db::Db;
use crate::entry::{Attributes, Entry, Value};
use crate::error::{Error, Result};

/// A projected row: the key plus the requested attributes, absent ones
/// mapped to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub attrs: HashMap<String, Option<Value>>,
}

fn project(entry: Entry, names: &[&str]) -> Row {
    let mut attrs = entry.attrs.unwrap_or_default();
    Row {
        key: entry.key,
        attrs: names
            .iter()
            .map(|&name| (name.to_string(), attrs.remove(name)))
            .collect(),
    }
}

/// The largest possible key: `KEY_SIZE` bytes of the max ASCII character.
fn max_key() -> String {
    "\u{7f}".repeat(KEY_SIZE)
}

impl Db {
    /// Inserts a new row, failing with [`Error::KeyAlreadyExists`] when any
    /// live version of `key` exists.
    pub fn insert(&self, key: &str, attrs: Attributes) -> Result<()> {
        if self.contains_key(key)? {
            return Err(Error::KeyAlreadyExists(key.to_string()));
        }
        self.update_txn(|txn| txn.write(key, attrs))
    }

    /// Merges `attrs` into an existing row, failing with
    /// [`Error::KeyNotFound`] when the key does not exist. Runs as a
    /// read-modify-write transaction, so a concurrent writer aborts it.
    pub fn update(&self, key: &str, attrs: Attributes) -> Result<()> {
        if !self.contains_key(key)? {
            return Err(Error::KeyNotFound);
        }
        self.update_txn(|txn| {
            let entry = txn.read(key)?;
            let mut merged = entry.attrs.unwrap_or_default();
            merged.extend(attrs);
            txn.write(key, merged)
        })
    }

    /// Deletes a row. Deleting an absent key is not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.update_txn(|txn| txn.delete(key))
    }

    /// Reads one row projected onto `names`.
    pub fn read(&self, key: &str, names: &[&str]) -> Result<Row> {
        let entry = self.view_txn(|txn| txn.read(key))?;
        Ok(project(entry, names))
    }

    /// Returns every row with key >= `key`, in ascending key order,
    /// projected onto `names`.
    pub fn scan(&self, key: &str, names: &[&str]) -> Result<Vec<Row>> {
        let end = max_key();
        let entries = self.view_txn(|txn| txn.scan(key, &end))?;
        Ok(entries.into_iter().map(|e| project(e, names)).collect())
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        match self.read_at(key, u64::MAX) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Datum;
    use tempfile::TempDir;

    fn string_attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), Value::from(v)))
            .collect()
    }

    fn int_attrs(pairs: &[(&str, i64)]) -> Attributes {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), Value::from(v)))
            .collect()
    }

    #[test]
    fn test_insert_and_read() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        db.insert("test", string_attrs(&[("value", "test")])).unwrap();

        let row = db.read("test", &["value"]).unwrap();
        assert_eq!(row.key, "test");
        assert_eq!(
            row.attrs["value"].as_ref().unwrap().parse().unwrap(),
            Datum::String("test".to_string())
        );
    }

    #[test]
    fn test_insert_twice_fails() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        db.insert("test", string_attrs(&[("value", "test")])).unwrap();
        assert_eq!(
            db.insert("test", string_attrs(&[("value", "another test")])),
            Err(Error::KeyAlreadyExists("test".to_string()))
        );

        // The original value survives.
        let row = db.read("test", &["value"]).unwrap();
        assert_eq!(
            row.attrs["value"].as_ref().unwrap().parse().unwrap(),
            Datum::String("test".to_string())
        );
    }

    #[test]
    fn test_update_visibility() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        assert_eq!(
            db.update("test", string_attrs(&[("value", "test")])),
            Err(Error::KeyNotFound)
        );

        db.insert("test", string_attrs(&[("value", "test")])).unwrap();
        db.update("test", string_attrs(&[("value", "another test")]))
            .unwrap();

        let row = db.read("test", &["value"]).unwrap();
        assert_eq!(
            row.attrs["value"].as_ref().unwrap().parse().unwrap(),
            Datum::String("another test".to_string())
        );
    }

    #[test]
    fn test_update_merges_attributes() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        db.insert("test", int_attrs(&[("a", 1), ("b", 2)])).unwrap();
        db.update("test", int_attrs(&[("b", 20), ("c", 30)])).unwrap();

        let row = db.read("test", &["a", "b", "c"]).unwrap();
        assert_eq!(
            row.attrs["a"].as_ref().unwrap().parse().unwrap(),
            Datum::Int(1)
        );
        assert_eq!(
            row.attrs["b"].as_ref().unwrap().parse().unwrap(),
            Datum::Int(20)
        );
        assert_eq!(
            row.attrs["c"].as_ref().unwrap().parse().unwrap(),
            Datum::Int(30)
        );
    }

    #[test]
    fn test_delete_then_read() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        // Deleting an absent key is fine.
        db.delete("test").unwrap();

        db.insert("test", string_attrs(&[("value", "test")])).unwrap();
        db.delete("test").unwrap();
        assert_eq!(db.read("test", &["value"]), Err(Error::KeyNotFound));

        // And the key is insertable again afterwards.
        db.insert("test", string_attrs(&[("value", "back")])).unwrap();
        assert!(db.read("test", &["value"]).is_ok());
    }

    #[test]
    fn test_scan_bounds() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        db.insert("test", string_attrs(&[("value", "1")])).unwrap();
        db.insert("z", string_attrs(&[("value", "2")])).unwrap();
        db.insert("zz999", string_attrs(&[("value", "3")])).unwrap();

        let rows = db.scan("0", &["value"]).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["test", "z", "zz999"]);

        let rows = db.scan("u", &["value"]).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["z", "zz999"]);
    }

    #[test]
    fn test_scan_over_only_tombstones_is_empty() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        db.insert("a", string_attrs(&[("value", "1")])).unwrap();
        db.insert("b", string_attrs(&[("value", "2")])).unwrap();
        db.delete("a").unwrap();
        db.delete("b").unwrap();

        assert!(db.scan("0", &["value"]).unwrap().is_empty());
    }

    #[test]
    fn test_projection_fills_missing_with_none() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path()).unwrap();

        db.insert("test", int_attrs(&[("1", 1), ("2", 2), ("3", 3)]))
            .unwrap();

        let row = db.read("test", &["1", "2", "3", "4"]).unwrap();
        assert_eq!(row.attrs.len(), 4);
        for name in ["1", "2", "3"] {
            let value = row.attrs[name].as_ref().unwrap();
            assert_eq!(
                value.parse().unwrap(),
                Datum::Int(name.parse::<i64>().unwrap())
            );
        }
        assert!(row.attrs["4"].is_none());
    }
}
