//! Process-wide instance cache and backend selection.
//!
//! One manager owns the canonical-path → instance map, guaranteeing at most
//! one live instance per path so every caller observes the same in-memory
//! state. The manager is an explicit service object with its own lifecycle;
//! construct it at process start and tear it down with [`PreferencesManager::close_all`].
//!
//! Backend selection is conservative: an existing on-disk format always
//! wins over whatever the caller requested, so persisted data is never
//! silently reinterpreted in the other format.

use crate::backend::document::{BACKUP_SUFFIX, BROKEN_SUFFIX, LOCK_SUFFIX, sibling_path};
use crate::backend::{
    DocumentStore, KV_SIDE_SUFFIXES, KvStore, StorageBackend, StorageKind, kv_db_path,
};
use crate::executor::NotifyExecutor;
use crate::observer::CrossProcessNotifier;
use crate::options::Options;
use crate::preferences::Preferences;
use parking_lot::Mutex;
use prefstore_common::{Error, Result, StoreConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Process-wide preferences service: per-path instance cache plus the
/// backend selection policy.
pub struct PreferencesManager {
    cache: Mutex<HashMap<PathBuf, Arc<Preferences>>>,
    executor: Arc<NotifyExecutor>,
    /// Bundle-name substrings opted into the KV engine by default
    enhance_allowlist: Vec<String>,
    notifier: Option<Arc<dyn CrossProcessNotifier>>,
}

impl PreferencesManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            executor: Arc::new(NotifyExecutor::new()),
            enhance_allowlist: Vec::new(),
            notifier: None,
        }
    }

    /// Opt bundles whose name contains one of `bundles` into the KV engine
    /// by default (known heavy consumers).
    #[must_use]
    pub fn with_enhance_allowlist(
        mut self,
        bundles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.enhance_allowlist = bundles.into_iter().map(Into::into).collect();
        self
    }

    /// Install the outbound cross-process change channel.
    #[must_use]
    pub fn with_cross_process_notifier(mut self, notifier: Arc<dyn CrossProcessNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Whether `kind` can be instantiated on this platform/build.
    #[must_use]
    pub fn is_storage_type_supported(&self, kind: StorageKind) -> bool {
        match kind {
            StorageKind::Document | StorageKind::Kv => true,
        }
    }

    /// Return the shared instance for `options.file_path`, creating and
    /// caching it on first use. Initialization failures are not cached.
    pub fn get_preferences(&self, options: Options) -> Result<Arc<Preferences>> {
        if let Some(group) = &options.data_group_id {
            if group.is_empty() {
                return Err(Error::invalid_param("data group id is empty"));
            }
        }
        let path = validate_path(&options.file_path, options.config.max_path_length)?;

        let mut cache = self.cache.lock();
        if let Some(prefs) = cache.get(&path) {
            debug!(path = %path.display(), "preferences found in cache");
            return Ok(Arc::clone(prefs));
        }

        let kind = self.select_kind(&options, &path)?;
        let backend: Box<dyn StorageBackend> = match kind {
            StorageKind::Document => {
                let lock_path = options
                    .data_group_id
                    .as_ref()
                    .map(|_| sibling_path(&path, LOCK_SUFFIX));
                Box::new(DocumentStore::open(&path, lock_path)?)
            }
            StorageKind::Kv => Box::new(KvStore::open(
                &kv_db_path(&path),
                options.config.large_value_threshold,
            )?),
        };
        info!(path = %path.display(), ?kind, "preferences instance created");

        let prefs = Arc::new(Preferences::new(
            options,
            backend,
            Arc::clone(&self.executor),
            self.notifier.clone(),
        ));
        cache.insert(path, Arc::clone(&prefs));
        Ok(prefs)
    }

    /// Backend selection, evaluated once at creation time:
    /// 1. existing document file wins, always;
    /// 2. existing KV store wins, but an explicit document request fails
    ///    with `NotSupported` unless the bundle is allow-listed;
    /// 3. with nothing on disk, the KV engine is used when requested (or
    ///    allow-listed) and available, the document engine otherwise.
    fn select_kind(&self, options: &Options, path: &Path) -> Result<StorageKind> {
        let document_exists = path.exists();
        let kv_exists = kv_db_path(path).exists();
        let allowlisted = !options.bundle_name.is_empty()
            && self
                .enhance_allowlist
                .iter()
                .any(|b| options.bundle_name.contains(b.as_str()));

        if document_exists {
            if options.storage_type == Some(StorageKind::Kv) || allowlisted {
                debug!(path = %path.display(),
                    "document file exists, ignoring kv request");
            }
            return Ok(StorageKind::Document);
        }
        if kv_exists {
            if options.storage_type == Some(StorageKind::Document) && !allowlisted {
                return Err(Error::NotSupported(
                    "document format requested but a kv store exists".into(),
                ));
            }
            if !self.is_storage_type_supported(StorageKind::Kv) {
                return Err(Error::NotSupported("kv storage engine unavailable".into()));
            }
            return Ok(StorageKind::Kv);
        }

        let wants_kv = options.storage_type == Some(StorageKind::Kv) || allowlisted;
        if wants_kv && self.is_storage_type_supported(StorageKind::Kv) {
            Ok(StorageKind::Kv)
        } else {
            Ok(StorageKind::Document)
        }
    }

    /// Evict `path` from the cache, closing the KV backend first. A close
    /// failure retains the entry so a later retry is possible. The document
    /// backend holds no exclusive handle and needs no close here.
    pub fn remove_preferences_from_cache(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = validate_path(path.as_ref(), StoreConfig::default().max_path_length)?;
        let mut cache = self.cache.lock();
        let Some(prefs) = cache.get(&path) else {
            debug!(path = %path.display(), "preferences not in cache");
            return Ok(());
        };
        if prefs.kind() == StorageKind::Kv {
            prefs.close()?;
        }
        cache.remove(&path);
        Ok(())
    }

    /// Evict and physically destroy the store at `path`: primary, backup,
    /// broken marker, KV database, and its side files.
    pub fn delete_preferences(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = validate_path(path.as_ref(), StoreConfig::default().max_path_length)?;

        let mut group_id = None;
        {
            let mut cache = self.cache.lock();
            if let Some(prefs) = cache.get(&path) {
                info!(path = %path.display(), "deleting cached preferences");
                group_id = prefs.group_id().map(ToOwned::to_owned);
                prefs.close()?;
                cache.remove(&path);
            }
        }

        let lock_path = sibling_path(&path, LOCK_SUFFIX);
        let _lock = match group_id {
            Some(_) => Some(crate::file_lock::FileLock::exclusive(&lock_path)?),
            None => None,
        };

        let backup = sibling_path(&path, BACKUP_SUFFIX);
        let broken = sibling_path(&path, BROKEN_SUFFIX);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&backup);
        let _ = std::fs::remove_file(&broken);

        let db_path = kv_db_path(&path);
        remove_if_exists(&db_path)?;
        for suffix in KV_SIDE_SUFFIXES {
            remove_if_exists(&sibling_path(&db_path, suffix))?;
        }

        if group_id.is_some() {
            drop(_lock);
            let _ = std::fs::remove_file(&lock_path);
        }

        if path.exists() || backup.exists() || broken.exists() {
            return Err(Error::DeleteFileFail(path));
        }
        Ok(())
    }

    /// Teardown hook: drain pending notifications, then flush and close
    /// every cached instance.
    pub fn close_all(&self) -> Result<()> {
        self.executor.barrier();
        let mut cache = self.cache.lock();
        let mut first_error = None;
        for prefs in cache.values() {
            if let Err(e) = prefs.close() {
                first_error.get_or_insert(e);
            }
        }
        cache.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for PreferencesManager {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|_| Error::DeleteFileFail(path.to_path_buf()))?;
    }
    Ok(())
}

/// Validate the shape of a preferences file path. The validated path is
/// the cache key; no symlink resolution happens here.
fn validate_path(path: &Path, max_path_length: usize) -> Result<PathBuf> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(Error::invalid_param("file path is empty"));
    }
    if raw.len() > max_path_length {
        return Err(Error::PathExceedMaxLength);
    }
    if !path.is_absolute() {
        return Err(Error::RelativePath);
    }
    match path.file_name() {
        Some(name) if !name.is_empty() => Ok(path.to_path_buf()),
        _ => Err(Error::EmptyFileName),
    }
}
