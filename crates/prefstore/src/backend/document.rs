//! Document engine: the whole settings map lives in memory.
//!
//! `Init` loads the XML document once; reads never touch disk afterwards.
//! Mutations update memory and set a dirty flag; `flush` serializes the map
//! back atomically (temp file + fsync + rename) with a backup to recover
//! from a crash mid-rename. The only desync window is a process crash
//! between mutation and flush, which is the documented contract.

use crate::backend::{StorageBackend, StorageKind};
use crate::file_lock::FileLock;
use crate::xml;
use parking_lot::RwLock;
use prefstore_common::{Error, Result, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix of the backup copy kept across a flush rename.
pub const BACKUP_SUFFIX: &str = "_backup";
/// Suffix the load path renames an unparsable primary file to.
pub const BROKEN_SUFFIX: &str = "_broken";
/// Suffix of the advisory lock file for group-shared stores.
pub const LOCK_SUFFIX: &str = ".lock";

const TMP_SUFFIX: &str = ".tmp";

/// Append a suffix to the full file name.
#[must_use]
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    os.into()
}

struct DocInner {
    settings: BTreeMap<String, Value>,
    dirty: bool,
}

/// XML-document-backed preferences storage.
pub struct DocumentStore {
    path: PathBuf,
    backup_path: PathBuf,
    broken_path: PathBuf,
    tmp_path: PathBuf,
    /// Advisory lock file, only for group-shared stores
    lock_path: Option<PathBuf>,
    inner: RwLock<DocInner>,
}

impl DocumentStore {
    /// Load (or start empty) the document at `path`.
    ///
    /// A missing file is an empty store. An unparsable primary file is
    /// renamed to the broken marker and the backup is tried; with no
    /// backup the store starts empty, leaving the broken file for
    /// inspection. Open only fails when the backup itself is unreadable.
    pub fn open(path: &Path, lock_path: Option<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
            backup_path: sibling_path(path, BACKUP_SUFFIX),
            broken_path: sibling_path(path, BROKEN_SUFFIX),
            tmp_path: sibling_path(path, TMP_SUFFIX),
            lock_path,
            inner: RwLock::new(DocInner {
                settings: BTreeMap::new(),
                dirty: false,
            }),
        };
        let _lock = store.acquire_group_lock()?;
        let settings = store.load()?;
        store.inner.write().settings = settings;
        Ok(store)
    }

    fn acquire_group_lock(&self) -> Result<Option<FileLock>> {
        match &self.lock_path {
            Some(path) => Ok(Some(FileLock::exclusive(path)?)),
            None => Ok(None),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, Value>> {
        if self.path.exists() {
            match xml::read_document(&self.path) {
                Ok(settings) => return Ok(settings),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e,
                        "preferences file unreadable, trying backup");
                    std::fs::rename(&self.path, &self.broken_path)?;
                }
            }
        }
        if self.backup_path.exists() {
            std::fs::rename(&self.backup_path, &self.path)?;
            let settings = xml::read_document(&self.path)?;
            debug!(path = %self.path.display(), "recovered preferences from backup");
            return Ok(settings);
        }
        Ok(BTreeMap::new())
    }

    fn flush_locked(&self, inner: &mut DocInner) -> Result<()> {
        if !inner.dirty {
            return Ok(());
        }
        let _lock = self.acquire_group_lock()?;

        xml::write_document(&self.tmp_path, &inner.settings)
            .map_err(|e| Error::FlushFailed(e.to_string()))?;

        let had_primary = self.path.exists();
        if had_primary {
            if let Err(e) = std::fs::rename(&self.path, &self.backup_path) {
                let _ = std::fs::remove_file(&self.tmp_path);
                return Err(Error::FlushFailed(e.to_string()));
            }
        }
        if let Err(e) = std::fs::rename(&self.tmp_path, &self.path) {
            // Put the previous contents back; memory stays dirty so a
            // later flush can retry.
            if had_primary {
                let _ = std::fs::rename(&self.backup_path, &self.path);
            }
            let _ = std::fs::remove_file(&self.tmp_path);
            return Err(Error::FlushFailed(e.to_string()));
        }
        let _ = std::fs::remove_file(&self.backup_path);
        inner.dirty = false;
        debug!(path = %self.path.display(), "preferences flushed");
        Ok(())
    }
}

impl StorageBackend for DocumentStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Document
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().settings.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.write();
        inner.settings.insert(key.to_string(), value);
        inner.dirty = true;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let existed = inner.settings.remove(key).is_some();
        if existed {
            inner.dirty = true;
        }
        Ok(existed)
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.inner.read().settings.contains_key(key))
    }

    fn get_all(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.inner.read().settings.clone())
    }

    fn clear(&self) -> Result<BTreeMap<String, Value>> {
        let mut inner = self.inner.write();
        let removed = std::mem::take(&mut inner.settings);
        if !removed.is_empty() {
            inner.dirty = true;
        }
        Ok(removed)
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.flush_locked(&mut inner)
    }

    fn close(&self) -> Result<()> {
        // The document engine holds no exclusive handle; closing is a flush.
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(path: &Path) -> DocumentStore {
        DocumentStore::open(path, None).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir.path().join("prefs"));
        assert!(store.get_all().unwrap().is_empty());
        assert!(!dir.path().join("prefs").exists());
    }

    #[test]
    fn test_put_get_without_flush_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        let store = open(&path);
        store.put("a", Value::Int(5)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Value::Int(5)));
        assert!(!path.exists());
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        {
            let store = open(&path);
            store.put("a", Value::Int(5)).unwrap();
            store.put("s", Value::String("x".into())).unwrap();
            store.flush().unwrap();
        }
        let store = open(&path);
        assert_eq!(store.get("a").unwrap(), Some(Value::Int(5)));
        assert_eq!(store.get("s").unwrap(), Some(Value::String("x".into())));
        assert!(!sibling_path(&path, BACKUP_SUFFIX).exists());
        assert!(!sibling_path(&path, ".tmp").exists());
    }

    #[test]
    fn test_flush_clean_store_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        let store = open(&path);
        store.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir.path().join("prefs"));
        store.put("a", Value::Bool(true)).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_clear_returns_removed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir.path().join("prefs"));
        store.put("a", Value::Int(1)).unwrap();
        store.put("b", Value::Int(2)).unwrap();
        let removed = store.clear().unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed["a"], Value::Int(1));
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_flush_failure_keeps_state_and_allows_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        let backup = sibling_path(&path, BACKUP_SUFFIX);
        let store = open(&path);
        store.put("a", Value::Int(1)).unwrap();
        store.flush().unwrap();
        store.put("a", Value::Int(2)).unwrap();

        // A directory squatting on the backup path makes the
        // primary -> backup rename fail.
        std::fs::create_dir(&backup).unwrap();
        assert!(matches!(store.flush(), Err(Error::FlushFailed(_))));

        // Memory keeps the new value, disk still holds the old one,
        // and no temp file is left behind.
        assert_eq!(store.get("a").unwrap(), Some(Value::Int(2)));
        assert_eq!(
            crate::xml::read_document(&path).unwrap()["a"],
            Value::Int(1)
        );
        assert!(!sibling_path(&path, ".tmp").exists());

        // Dirty flag survives the failure: the retry flushes.
        std::fs::remove_dir(&backup).unwrap();
        store.flush().unwrap();
        assert_eq!(
            crate::xml::read_document(&path).unwrap()["a"],
            Value::Int(2)
        );
    }

    #[test]
    fn test_broken_primary_recovers_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        {
            let store = open(&path);
            store.put("a", Value::Int(7)).unwrap();
            store.flush().unwrap();
        }
        // Simulate a crash that left a corrupt primary and a good backup.
        std::fs::rename(&path, sibling_path(&path, BACKUP_SUFFIX)).unwrap();
        std::fs::write(&path, b"<<< corrupt").unwrap();

        let store = open(&path);
        assert_eq!(store.get("a").unwrap(), Some(Value::Int(7)));
        assert!(sibling_path(&path, BROKEN_SUFFIX).exists());
    }

    #[test]
    fn test_missing_primary_promotes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        {
            let store = open(&path);
            store.put("a", Value::Int(3)).unwrap();
            store.flush().unwrap();
        }
        std::fs::rename(&path, sibling_path(&path, BACKUP_SUFFIX)).unwrap();

        let store = open(&path);
        assert_eq!(store.get("a").unwrap(), Some(Value::Int(3)));
        assert!(path.exists());
    }

    #[test]
    fn test_group_lock_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        let lock_path = sibling_path(&path, LOCK_SUFFIX);
        {
            let store = DocumentStore::open(&path, Some(lock_path.clone())).unwrap();
            store.put("a", Value::Int(1)).unwrap();
            store.flush().unwrap();
        }
        let store = DocumentStore::open(&path, Some(lock_path)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Value::Int(1)));
    }
}
