//! Prefstore - process-local typed key-value preferences
//!
//! A preferences file is a persistent map from string keys to small typed
//! values, backed by one of two interchangeable engines: a human-readable
//! XML document (loaded fully into memory, flushed atomically on demand) or
//! an embedded transactional KV database (write-through, durable per write).
//!
//! [`PreferencesManager`] owns the per-path instance cache and decides which
//! engine to instantiate from on-disk evidence and caller policy; the
//! [`Preferences`] facade validates inputs, dispatches to the engine, and
//! fans change notifications out to registered observers.

pub mod backend;
pub mod executor;
pub mod file_lock;
pub mod manager;
pub mod observer;
pub mod options;
pub mod preferences;
pub mod xml;

pub use backend::StorageKind;
pub use manager::PreferencesManager;
pub use observer::{CrossProcessNotifier, DataObserver, ObserverScope, PreferencesObserver};
pub use options::Options;
pub use preferences::Preferences;
pub use prefstore_common::{Error, Result, StoreConfig, Value, ValueKind};
