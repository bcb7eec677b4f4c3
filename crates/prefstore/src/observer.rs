//! Change observers and their registry.
//!
//! Two listener roles: whole-store observers receive one key per callback
//! (`Local` scope, or `MultiProcess` which is additionally forwarded through
//! the cross-process channel when one is installed), and key-scoped data
//! observers receive a batch restricted to their registered interest set.
//!
//! The registry stores weak references; a callback runs only while the
//! observer object is still alive, so there is never an ownership cycle
//! between a store and its observers. Identity is `Arc` pointer identity.

use parking_lot::RwLock;
use prefstore_common::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Whole-store change listener; invoked once per changed key.
pub trait PreferencesObserver: Send + Sync {
    fn on_change(&self, key: &str);
}

/// Key-scoped change listener; invoked with the changed subset of its
/// registered keys and their new values (`Value::Null` for deletions).
pub trait DataObserver: Send + Sync {
    fn on_data_change(&self, records: &BTreeMap<String, Value>);
}

/// Delivery scope of a whole-store observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverScope {
    /// This process only
    Local,
    /// This process, plus forwarding through the cross-process channel
    MultiProcess,
}

/// Outbound channel notifying other processes of a mutation.
///
/// Installed on the manager; the registry calls it after local fan-out for
/// every changed key. Delivery into observers of other processes is the
/// channel implementation's business.
pub trait CrossProcessNotifier: Send + Sync {
    fn notify(&self, path: &Path, key: &str);
}

struct DataEntry {
    observer: Weak<dyn DataObserver>,
    keys: HashSet<String>,
}

#[derive(Default)]
struct Registered {
    local: Vec<Weak<dyn PreferencesObserver>>,
    multi_process: Vec<Weak<dyn PreferencesObserver>>,
    data: Vec<DataEntry>,
}

impl Registered {
    fn list_mut(&mut self, scope: ObserverScope) -> &mut Vec<Weak<dyn PreferencesObserver>> {
        match scope {
            ObserverScope::Local => &mut self.local,
            ObserverScope::MultiProcess => &mut self.multi_process,
        }
    }

    fn prune(&mut self) {
        self.local.retain(|w| w.strong_count() > 0);
        self.multi_process.retain(|w| w.strong_count() > 0);
        self.data.retain(|e| e.observer.strong_count() > 0);
    }
}

/// Per-instance observer registry.
///
/// Guarded by its own lock, separate from the data locks, so registration
/// never blocks on an in-flight mutation and vice versa.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: RwLock<Registered>,
}

impl ObserverRegistry {
    /// Register a whole-store observer. Re-registering the same observer
    /// for the same scope is a no-op.
    pub fn register(&self, scope: ObserverScope, observer: &Arc<dyn PreferencesObserver>) {
        let mut inner = self.inner.write();
        inner.prune();
        let target = Arc::downgrade(observer);
        let list = inner.list_mut(scope);
        if list.iter().any(|w| Weak::ptr_eq(w, &target)) {
            return;
        }
        list.push(target);
    }

    /// Remove every registration of `observer` in `scope`.
    pub fn unregister(&self, scope: ObserverScope, observer: &Arc<dyn PreferencesObserver>) {
        let mut inner = self.inner.write();
        let target = Arc::downgrade(observer);
        inner.list_mut(scope).retain(|w| !Weak::ptr_eq(w, &target));
        inner.prune();
    }

    /// Register a key-scoped observer for `keys`. Registering the same
    /// observer again merges the interest sets.
    pub fn register_data(
        &self,
        observer: &Arc<dyn DataObserver>,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) {
        let mut inner = self.inner.write();
        inner.prune();
        let target = Arc::downgrade(observer);
        let keys = keys.into_iter().map(Into::into);
        if let Some(entry) = inner
            .data
            .iter_mut()
            .find(|e| Weak::ptr_eq(&e.observer, &target))
        {
            entry.keys.extend(keys);
        } else {
            inner.data.push(DataEntry {
                observer: target,
                keys: keys.collect(),
            });
        }
    }

    /// Drop `keys` from the observer's interest set; an empty `keys` list
    /// removes the observer entirely, as does an emptied set.
    pub fn unregister_data(&self, observer: &Arc<dyn DataObserver>, keys: &[String]) {
        let mut inner = self.inner.write();
        let target = Arc::downgrade(observer);
        if keys.is_empty() {
            inner.data.retain(|e| !Weak::ptr_eq(&e.observer, &target));
        } else if let Some(entry) = inner
            .data
            .iter_mut()
            .find(|e| Weak::ptr_eq(&e.observer, &target))
        {
            for key in keys {
                entry.keys.remove(key);
            }
        }
        inner.data.retain(|e| !e.keys.is_empty());
        inner.prune();
    }

    /// Fan `records` out to every matching live observer.
    ///
    /// The registry lock is only held while snapshotting; callbacks run
    /// unlocked so they may re-register without deadlocking.
    pub fn notify(
        &self,
        path: &Path,
        records: &BTreeMap<String, Value>,
        notifier: Option<&Arc<dyn CrossProcessNotifier>>,
    ) {
        if records.is_empty() {
            return;
        }
        let (locals, multis, data) = {
            let inner = self.inner.read();
            let upgrade =
                |list: &[Weak<dyn PreferencesObserver>]| -> Vec<Arc<dyn PreferencesObserver>> {
                    list.iter().filter_map(Weak::upgrade).collect()
                };
            let data: Vec<(Arc<dyn DataObserver>, BTreeMap<String, Value>)> = inner
                .data
                .iter()
                .filter_map(|entry| {
                    let observer = entry.observer.upgrade()?;
                    let hits: BTreeMap<String, Value> = records
                        .iter()
                        .filter(|(k, _)| entry.keys.contains(*k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    (!hits.is_empty()).then_some((observer, hits))
                })
                .collect();
            (upgrade(&inner.local), upgrade(&inner.multi_process), data)
        };

        debug!(
            changed = records.len(),
            local = locals.len(),
            multi_process = multis.len(),
            data_scoped = data.len(),
            "notifying observers"
        );

        for (observer, hits) in &data {
            observer.on_data_change(hits);
        }
        for key in records.keys() {
            for observer in &locals {
                observer.on_change(key);
            }
            for observer in &multis {
                observer.on_change(key);
            }
            if let Some(notifier) = notifier {
                notifier.notify(path, key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        keys: Mutex<Vec<String>>,
    }

    impl PreferencesObserver for Recorder {
        fn on_change(&self, key: &str) {
            self.keys.lock().push(key.to_string());
        }
    }

    #[derive(Default)]
    struct BatchRecorder {
        batches: Mutex<Vec<BTreeMap<String, Value>>>,
    }

    impl DataObserver for BatchRecorder {
        fn on_data_change(&self, records: &BTreeMap<String, Value>) {
            self.batches.lock().push(records.clone());
        }
    }

    fn one_record(key: &str) -> BTreeMap<String, Value> {
        BTreeMap::from([(key.to_string(), Value::Int(1))])
    }

    #[test]
    fn test_duplicate_registration_is_suppressed() {
        let registry = ObserverRegistry::default();
        let recorder = Arc::new(Recorder::default());
        let observer: Arc<dyn PreferencesObserver> = recorder.clone();
        registry.register(ObserverScope::Local, &observer);
        registry.register(ObserverScope::Local, &observer);

        registry.notify(Path::new("/p"), &one_record("k"), None);
        assert_eq!(recorder.keys.lock().len(), 1);
    }

    #[test]
    fn test_unregister_removes_exactly_the_matching_entry() {
        let registry = ObserverRegistry::default();
        let kept = Arc::new(Recorder::default());
        let removed = Arc::new(Recorder::default());
        let kept_obs: Arc<dyn PreferencesObserver> = kept.clone();
        let removed_obs: Arc<dyn PreferencesObserver> = removed.clone();
        registry.register(ObserverScope::Local, &kept_obs);
        registry.register(ObserverScope::Local, &removed_obs);
        registry.unregister(ObserverScope::Local, &removed_obs);

        registry.notify(Path::new("/p"), &one_record("k"), None);
        assert_eq!(kept.keys.lock().len(), 1);
        assert!(removed.keys.lock().is_empty());
    }

    #[test]
    fn test_data_observer_sees_only_its_keys() {
        let registry = ObserverRegistry::default();
        let recorder = Arc::new(BatchRecorder::default());
        let observer: Arc<dyn DataObserver> = recorder.clone();
        registry.register_data(&observer, ["k1"]);

        let records = BTreeMap::from([
            ("k1".to_string(), Value::Int(1)),
            ("k2".to_string(), Value::Int(2)),
        ]);
        registry.notify(Path::new("/p"), &records, None);

        let batches = recorder.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0]["k1"], Value::Int(1));
    }

    #[test]
    fn test_data_observer_with_no_matching_key_is_skipped() {
        let registry = ObserverRegistry::default();
        let recorder = Arc::new(BatchRecorder::default());
        let observer: Arc<dyn DataObserver> = recorder.clone();
        registry.register_data(&observer, ["other"]);

        registry.notify(Path::new("/p"), &one_record("k"), None);
        assert!(recorder.batches.lock().is_empty());
    }

    #[test]
    fn test_data_registration_merges_key_sets() {
        let registry = ObserverRegistry::default();
        let recorder = Arc::new(BatchRecorder::default());
        let observer: Arc<dyn DataObserver> = recorder.clone();
        registry.register_data(&observer, ["k1"]);
        registry.register_data(&observer, ["k2"]);

        let records = BTreeMap::from([
            ("k1".to_string(), Value::Int(1)),
            ("k2".to_string(), Value::Int(2)),
        ]);
        registry.notify(Path::new("/p"), &records, None);
        assert_eq!(recorder.batches.lock()[0].len(), 2);
    }

    #[test]
    fn test_data_unregister_by_key_and_entirely() {
        let registry = ObserverRegistry::default();
        let recorder = Arc::new(BatchRecorder::default());
        let observer: Arc<dyn DataObserver> = recorder.clone();
        registry.register_data(&observer, ["k1", "k2"]);

        registry.unregister_data(&observer, &["k1".to_string()]);
        registry.notify(Path::new("/p"), &one_record("k1"), None);
        assert!(recorder.batches.lock().is_empty());

        registry.unregister_data(&observer, &[]);
        let records = BTreeMap::from([("k2".to_string(), Value::Int(2))]);
        registry.notify(Path::new("/p"), &records, None);
        assert!(recorder.batches.lock().is_empty());
    }

    #[test]
    fn test_dead_observers_are_skipped() {
        let registry = ObserverRegistry::default();
        {
            let recorder = Arc::new(Recorder::default());
            let observer: Arc<dyn PreferencesObserver> = recorder;
            registry.register(ObserverScope::Local, &observer);
        }
        // The only strong reference is gone; notify must not panic.
        registry.notify(Path::new("/p"), &one_record("k"), None);
    }

    #[test]
    fn test_cross_process_channel_receives_every_key() {
        struct Channel {
            keys: Mutex<Vec<String>>,
        }
        impl CrossProcessNotifier for Channel {
            fn notify(&self, _path: &Path, key: &str) {
                self.keys.lock().push(key.to_string());
            }
        }

        let registry = ObserverRegistry::default();
        let channel = Arc::new(Channel {
            keys: Mutex::new(Vec::new()),
        });
        let notifier: Arc<dyn CrossProcessNotifier> = channel.clone();
        let records = BTreeMap::from([
            ("a".to_string(), Value::Null),
            ("b".to_string(), Value::Null),
        ]);
        registry.notify(Path::new("/p"), &records, Some(&notifier));
        assert_eq!(*channel.keys.lock(), vec!["a".to_string(), "b".to_string()]);
    }
}
