//! Transactional KV engine backed by redb.
//!
//! No full in-memory copy: every operation goes to the embedded store.
//! A data-version counter in the meta table is bumped inside each write
//! transaction; `get`/`has_key` read it first and serve large values from
//! the in-process cache when the version is unchanged, avoiding repeated
//! deserialization of big blobs. Small values are never cached.
//!
//! One mutex serializes everything against this instance; reads take it
//! too, because the version check plus the conditional cache lookup is not
//! safe to run concurrently with a writer.

use crate::backend::{StorageBackend, StorageKind};
use parking_lot::Mutex;
use prefstore_common::{Error, Result, Value};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

const PREFS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("preferences");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Meta-table key of the monotonically increasing data-version counter.
const DATA_VERSION: &str = "data_version";

/// Cache generation that can never match a store version.
const VERSION_UNSET: u64 = u64::MAX;

struct KvInner {
    /// `None` once the store has been closed
    db: Option<Database>,
    /// Deserialized values whose blob size crossed the threshold
    large_cache: HashMap<String, Value>,
    /// Store version the cache contents were observed at
    cached_version: u64,
}

impl KvInner {
    fn db(&self) -> Result<&Database> {
        self.db.as_ref().ok_or(Error::AlreadyClosed)
    }
}

/// redb-backed preferences storage.
pub struct KvStore {
    inner: Mutex<KvInner>,
    /// Serialized size at which values enter the large-value cache
    threshold: usize,
}

impl KvStore {
    /// Open (or create) the database file at `db_path`.
    pub fn open(db_path: &Path, threshold: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(db_path).map_err(Error::storage)?;

        // Create both tables eagerly so later read txns don't fail
        let txn = db.begin_write().map_err(Error::storage)?;
        {
            let _prefs = txn.open_table(PREFS_TABLE).map_err(Error::storage)?;
            let mut meta = txn.open_table(META_TABLE).map_err(Error::storage)?;
            if meta.get(DATA_VERSION).map_err(Error::storage)?.is_none() {
                meta.insert(DATA_VERSION, 0).map_err(Error::storage)?;
            }
        }
        txn.commit().map_err(Error::storage)?;

        debug!(path = %db_path.display(), "kv preferences store opened");
        Ok(Self {
            inner: Mutex::new(KvInner {
                db: Some(db),
                large_cache: HashMap::new(),
                cached_version: VERSION_UNSET,
            }),
            threshold,
        })
    }

    fn read_version(db: &Database) -> Result<u64> {
        let txn = db.begin_read().map_err(Error::storage)?;
        let meta = txn.open_table(META_TABLE).map_err(Error::storage)?;
        Ok(meta
            .get(DATA_VERSION)
            .map_err(Error::storage)?
            .map_or(0, |guard| guard.value()))
    }

    fn read_blob(db: &Database, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = db.begin_read().map_err(Error::storage)?;
        let table = txn.open_table(PREFS_TABLE).map_err(Error::storage)?;
        Ok(table
            .get(key)
            .map_err(Error::storage)?
            .map(|guard| guard.value().to_vec()))
    }

    /// Bump the version counter inside `txn`, returning the new value.
    fn bump_version(txn: &redb::WriteTransaction) -> Result<u64> {
        let mut meta = txn.open_table(META_TABLE).map_err(Error::storage)?;
        let current = meta
            .get(DATA_VERSION)
            .map_err(Error::storage)?
            .map_or(0, |guard| guard.value());
        let next = current.wrapping_add(1);
        meta.insert(DATA_VERSION, next).map_err(Error::storage)?;
        Ok(next)
    }

    /// Full snapshot plus opportunistic cache population; caller holds the lock.
    fn get_all_locked(&self, inner: &mut KvInner) -> Result<BTreeMap<String, Value>> {
        let version = Self::read_version(inner.db()?)?;
        let pairs: Vec<(String, Vec<u8>)> = {
            let db = inner.db()?;
            let txn = db.begin_read().map_err(Error::storage)?;
            let table = txn.open_table(PREFS_TABLE).map_err(Error::storage)?;
            let mut pairs = Vec::new();
            for entry in table.iter().map_err(Error::storage)? {
                let (key, blob) = entry.map_err(Error::storage)?;
                pairs.push((key.value().to_string(), blob.value().to_vec()));
            }
            pairs
        };

        let mut snapshot = BTreeMap::new();
        for (key, blob) in pairs {
            let value = Value::from_bytes(&blob)?;
            if blob.len() >= self.threshold {
                inner.large_cache.insert(key.clone(), value.clone());
            }
            snapshot.insert(key, value);
        }
        inner.cached_version = version;
        Ok(snapshot)
    }
}

impl StorageBackend for KvStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Kv
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut inner = self.inner.lock();
        let version = Self::read_version(inner.db()?)?;
        if version == inner.cached_version {
            if let Some(value) = inner.large_cache.get(key) {
                return Ok(Some(value.clone()));
            }
        }

        let Some(blob) = Self::read_blob(inner.db()?, key)? else {
            return Ok(None);
        };
        let value = Value::from_bytes(&blob)?;
        if blob.len() >= self.threshold {
            inner.large_cache.insert(key.to_string(), value.clone());
            inner.cached_version = version;
        }
        Ok(Some(value))
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.lock();
        let blob = value.to_bytes()?;
        let new_version = {
            let db = inner.db()?;
            let txn = db.begin_write().map_err(Error::storage)?;
            let new_version = Self::bump_version(&txn)?;
            {
                let mut table = txn.open_table(PREFS_TABLE).map_err(Error::storage)?;
                table
                    .insert(key, blob.as_slice())
                    .map_err(Error::storage)?;
            }
            txn.commit().map_err(Error::storage)?;
            new_version
        };

        if blob.len() >= self.threshold {
            inner.large_cache.insert(key.to_string(), value);
            inner.cached_version = new_version;
        } else {
            // A value that shrank below the threshold must not be served
            // from the cache anymore.
            inner.large_cache.remove(key);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let existed = {
            let db = inner.db()?;
            let txn = db.begin_write().map_err(Error::storage)?;
            Self::bump_version(&txn)?;
            let existed = {
                let mut table = txn.open_table(PREFS_TABLE).map_err(Error::storage)?;
                table.remove(key).map_err(Error::storage)?.is_some()
            };
            txn.commit().map_err(Error::storage)?;
            existed
        };
        inner.large_cache.remove(key);
        Ok(existed)
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let version = Self::read_version(inner.db()?)?;
        if version == inner.cached_version && inner.large_cache.contains_key(key) {
            return Ok(true);
        }

        let Some(blob) = Self::read_blob(inner.db()?, key)? else {
            return Ok(false);
        };
        if blob.len() >= self.threshold {
            let value = Value::from_bytes(&blob)?;
            inner.large_cache.insert(key.to_string(), value);
            inner.cached_version = version;
        }
        Ok(true)
    }

    fn get_all(&self) -> Result<BTreeMap<String, Value>> {
        let mut inner = self.inner.lock();
        self.get_all_locked(&mut inner)
    }

    fn clear(&self) -> Result<BTreeMap<String, Value>> {
        let mut inner = self.inner.lock();
        let snapshot = self.get_all_locked(&mut inner)?;

        let new_version = {
            let db = inner.db()?;
            let txn = db.begin_write().map_err(Error::storage)?;
            let new_version = Self::bump_version(&txn)?;
            txn.delete_table(PREFS_TABLE).map_err(Error::storage)?;
            txn.open_table(PREFS_TABLE).map_err(Error::storage)?;
            txn.commit().map_err(Error::storage)?;
            new_version
        };

        inner.large_cache.clear();
        inner.cached_version = new_version;
        Ok(snapshot)
    }

    fn flush(&self) -> Result<()> {
        // Every write commits durably; flush only validates liveness.
        let inner = self.inner.lock();
        inner.db().map(|_| ())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.db.is_none() {
            return Ok(());
        }
        inner.db = None;
        inner.large_cache.clear();
        inner.cached_version = VERSION_UNSET;
        debug!("kv preferences store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_CACHE: usize = usize::MAX;

    fn open(dir: &tempfile::TempDir, threshold: usize) -> KvStore {
        KvStore::open(&dir.path().join("prefs.db"), threshold).unwrap()
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, NO_CACHE);
        store.put("a", Value::Int(5)).unwrap();
        store.put("s", Value::StringArray(vec!["x".into()])).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Value::Int(5)));
        assert_eq!(
            store.get("s").unwrap(),
            Some(Value::StringArray(vec!["x".into()]))
        );
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir, NO_CACHE);
            store.put("a", Value::Double(1.5)).unwrap();
            store.close().unwrap();
        }
        let store = open(&dir, NO_CACHE);
        assert_eq!(store.get("a").unwrap(), Some(Value::Double(1.5)));
    }

    #[test]
    fn test_delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, NO_CACHE);
        store.put("a", Value::Bool(false)).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_clear_returns_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, NO_CACHE);
        store.put("a", Value::Int(1)).unwrap();
        store.put("b", Value::Int(2)).unwrap();
        let removed = store.clear().unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.get_all().unwrap().is_empty());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_close_is_idempotent_and_fences_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, NO_CACHE);
        store.put("a", Value::Int(1)).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get("a"), Err(Error::AlreadyClosed)));
        assert!(matches!(
            store.put("a", Value::Int(2)),
            Err(Error::AlreadyClosed)
        ));
        assert!(matches!(store.get_all(), Err(Error::AlreadyClosed)));
        assert!(matches!(store.flush(), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn test_large_values_round_trip_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        // Threshold of one byte: everything is "large" and cached.
        let store = open(&dir, 1);
        let big = Value::String("y".repeat(4096));
        store.put("big", big.clone()).unwrap();
        assert_eq!(store.get("big").unwrap(), Some(big));
        assert!(store.has_key("big").unwrap());

        // Shrinking the value below the threshold must evict it.
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 128);
        let big = Value::String("y".repeat(512));
        store.put("k", big).unwrap();
        store.put("k", Value::Int(1)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_delete_evicts_cached_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1);
        store.put("k", Value::String("large".into())).unwrap();
        assert!(store.delete("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
        assert!(!store.has_key("k").unwrap());
    }

    #[test]
    fn test_get_all_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 1);
        store.put("a", Value::Int(1)).unwrap();
        store.put("b", Value::Bool(true)).unwrap();
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], Value::Int(1));
        assert_eq!(all["b"], Value::Bool(true));
    }
}
