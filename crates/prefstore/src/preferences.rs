//! The per-instance preferences facade.
//!
//! Validates keys and value sizes before any backend call, dispatches to
//! the engine the instance was constructed with, and fans out change
//! notifications: synchronously for the document engine (mutations are
//! in-memory and fast), via the background executor for the KV engine
//! (the caller returns as soon as the durable write commits).

use crate::backend::{StorageBackend, StorageKind};
use crate::executor::NotifyExecutor;
use crate::observer::{
    CrossProcessNotifier, DataObserver, ObserverRegistry, ObserverScope, PreferencesObserver,
};
use crate::options::Options;
use prefstore_common::{Error, Result, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// One preferences file: a persistent map from string keys to typed values.
///
/// Instances are created and cached by [`crate::PreferencesManager`]; all
/// handles for the same path share one instance and therefore one in-memory
/// state.
pub struct Preferences {
    options: Options,
    backend: Box<dyn StorageBackend>,
    observers: Arc<ObserverRegistry>,
    executor: Arc<NotifyExecutor>,
    notifier: Option<Arc<dyn CrossProcessNotifier>>,
}

impl Preferences {
    pub(crate) fn new(
        options: Options,
        backend: Box<dyn StorageBackend>,
        executor: Arc<NotifyExecutor>,
        notifier: Option<Arc<dyn CrossProcessNotifier>>,
    ) -> Self {
        Self {
            options,
            backend,
            observers: Arc::new(ObserverRegistry::default()),
            executor,
            notifier,
        }
    }

    /// Path of the primary preferences file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.options.file_path
    }

    /// Group-shared directory id, if this store carries one.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.options.data_group_id.as_deref()
    }

    /// Which storage engine backs this instance.
    #[must_use]
    pub fn kind(&self) -> StorageKind {
        self.backend.kind()
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_param("key is empty"));
        }
        if key.len() > self.options.config.max_key_length {
            return Err(Error::ExceedMaxLength("key"));
        }
        Ok(())
    }

    fn check_value(&self, value: &Value) -> Result<()> {
        if value.serialized_size()? > self.options.config.max_value_size {
            return Err(Error::ExceedMaxLength("value"));
        }
        Ok(())
    }

    /// Read `key`, falling back to `default` on a miss, a backend error,
    /// or a type mismatch against a non-Null default. The read path is
    /// non-fatal by design.
    pub fn get(&self, key: &str, default: impl Into<Value>) -> Value {
        let default = default.into();
        if self.check_key(key).is_err() {
            return default;
        }
        match self.backend.get(key) {
            Ok(Some(value)) if default.is_null() || value.kind() == default.kind() => value,
            Ok(Some(_)) | Ok(None) => default,
            Err(e) => {
                warn!(key, error = %e, "get failed, returning default");
                default
            }
        }
    }

    /// Read `key`, surfacing misses and backend failures as errors.
    pub fn get_value(&self, key: &str) -> Result<Value> {
        self.check_key(key)?;
        self.backend
            .get(key)?
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Store `value` under `key` and notify observers.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.check_key(key)?;
        self.check_value(&value)?;
        self.backend.put(key, value.clone())?;
        self.dispatch(BTreeMap::from([(key.to_string(), value)]));
        Ok(())
    }

    /// Remove `key`; observers are notified with `Value::Null` when the key
    /// actually existed.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.check_key(key)?;
        let existed = self.backend.delete(key)?;
        if existed {
            self.dispatch(BTreeMap::from([(key.to_string(), Value::Null)]));
        }
        Ok(())
    }

    /// Whether `key` is present. Errors degrade to `false`.
    pub fn has_key(&self, key: &str) -> bool {
        if self.check_key(key).is_err() {
            return false;
        }
        self.backend.has_key(key).unwrap_or(false)
    }

    /// Point-in-time snapshot of the whole store, taken under the
    /// backend's own lock. Not transactional with concurrent writers.
    pub fn get_all(&self) -> Result<BTreeMap<String, Value>> {
        self.backend.get_all()
    }

    /// Remove every key, notifying observers for each previously-present
    /// key as if it were individually deleted.
    pub fn clear(&self) -> Result<()> {
        let removed = self.backend.clear()?;
        let records: BTreeMap<String, Value> = removed
            .into_keys()
            .map(|key| (key, Value::Null))
            .collect();
        self.dispatch(records);
        Ok(())
    }

    /// Persist in-memory state. A successful no-op for the KV engine,
    /// which is durable per write.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    pub(crate) fn close(&self) -> Result<()> {
        self.backend.close()
    }

    /// Register a whole-store observer; idempotent per (observer, scope).
    pub fn register_observer(&self, scope: ObserverScope, observer: Arc<dyn PreferencesObserver>) {
        self.observers.register(scope, &observer);
    }

    pub fn unregister_observer(
        &self,
        scope: ObserverScope,
        observer: Arc<dyn PreferencesObserver>,
    ) {
        self.observers.unregister(scope, &observer);
    }

    /// Register a key-scoped batch observer for `keys`; repeat registration
    /// merges the interest sets.
    pub fn register_data_observer(
        &self,
        observer: Arc<dyn DataObserver>,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.observers.register_data(&observer, keys);
    }

    /// Remove `keys` from the observer's interest set; an empty list
    /// removes the observer entirely.
    pub fn unregister_data_observer(&self, observer: Arc<dyn DataObserver>, keys: &[String]) {
        self.observers.unregister_data(&observer, keys);
    }

    /// Block until every notification enqueued so far has been delivered.
    /// Document-backed stores notify synchronously, so this only matters
    /// for KV-backed ones.
    pub fn sync_notifications(&self) {
        self.executor.barrier();
    }

    fn dispatch(&self, records: BTreeMap<String, Value>) {
        if records.is_empty() {
            return;
        }
        match self.backend.kind() {
            // In-memory mutation, notify in the caller's thread.
            StorageKind::Document => {
                self.observers
                    .notify(&self.options.file_path, &records, self.notifier.as_ref());
            }
            // Strictly after the durable write, but decoupled from it.
            StorageKind::Kv => {
                let observers = Arc::clone(&self.observers);
                let path = self.options.file_path.clone();
                let notifier = self.notifier.clone();
                self.executor.execute(move || {
                    observers.notify(&path, &records, notifier.as_ref());
                });
            }
        }
    }
}
