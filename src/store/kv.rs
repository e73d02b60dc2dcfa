//! Embedded key-value persistence for snapshots and order records.
//!
//! Grounded on `vault/vault_db.rs`'s `VaultDb` (an `Arc`-wrapped connection
//! opened once at startup, `Context`-wrapped open errors), swapped from
//! `rusqlite` to `rocksdb` since the matcher's access pattern is pure
//! key-value rather than relational.

use crate::error::MatcherError;
use std::path::Path;
use std::sync::Arc;

/// Column families the matcher keeps distinct namespaces in.
pub const CF_SNAPSHOTS: &str = "snapshots";
pub const CF_ORDERS: &str = "orders";
pub const CF_PAIRS: &str = "pairs";
pub const CF_RATES: &str = "rates";

#[derive(Clone)]
pub struct KvStore {
    db: Arc<rocksdb::DB>,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MatcherError> {
        let cfs = [CF_SNAPSHOTS, CF_ORDERS, CF_PAIRS, CF_RATES];
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = rocksdb::DB::open_cf(&opts, path, cfs)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, MatcherError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| MatcherError::InternalInvariant(format!("missing column family {name}")))
    }

    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<(), MatcherError> {
        let handle = self.cf(cf)?;
        self.db.put_cf(handle, key, value)?;
        Ok(())
    }

    pub fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, MatcherError> {
        let handle = self.cf(cf)?;
        Ok(self.db.get_cf(handle, key)?)
    }

    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<(), MatcherError> {
        let handle = self.cf(cf)?;
        self.db.delete_cf(handle, key)?;
        Ok(())
    }

    /// Iterates all key/value pairs in `cf` in key order, used to rebuild
    /// the in-memory order index and pair registry at startup.
    pub fn iter_all(&self, cf: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MatcherError> {
        let handle = self.cf(cf)?;
        let iter = self.db.iterator_cf(handle, rocksdb::IteratorMode::Start);
        let mut out = Vec::new();
        for item in iter {
            let (k, v) = item.map_err(MatcherError::from)?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store.put(CF_ORDERS, b"k1", b"v1").unwrap();
        assert_eq!(store.get(CF_ORDERS, b"k1").unwrap(), Some(b"v1".to_vec()));
        store.delete(CF_ORDERS, b"k1").unwrap();
        assert_eq!(store.get(CF_ORDERS, b"k1").unwrap(), None);
    }
}
