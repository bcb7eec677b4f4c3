//! Storage backend abstraction.
//!
//! The facade dispatches every operation through [`StorageBackend`]; the two
//! implementations are the in-memory-map document engine and the redb-backed
//! transactional KV engine. The capability set is deliberately closed: the
//! selection policy lives in the manager, the validation in the facade.

pub mod document;
pub mod kv;

pub use document::DocumentStore;
pub use kv::KvStore;

use prefstore_common::{Result, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Which physical storage engine backs an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Human-readable XML document, fully loaded into memory
    Document,
    /// Embedded transactional KV database, write-through
    Kv,
}

/// Suffix of the KV database file relative to the primary path.
pub const KV_DB_SUFFIX: &str = ".db";

/// Side files the KV engine may leave next to its database file.
pub const KV_SIDE_SUFFIXES: [&str; 6] = [".ctrl", ".ctrl.dwr", ".redo", ".undo", ".safe", ".map"];

/// Path of the KV database file for a given primary path.
#[must_use]
pub fn kv_db_path(primary: &Path) -> std::path::PathBuf {
    let mut os = primary.as_os_str().to_os_string();
    os.push(KV_DB_SUFFIX);
    os.into()
}

/// One storage engine behind a preferences instance.
///
/// `get` distinguishes a miss (`Ok(None)`) from a backend failure so the
/// facade can apply its default-fallback read contract. `delete` reports
/// whether the key existed and `clear` returns the removed entries, so the
/// facade only notifies observers about keys that actually changed.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn put(&self, key: &str, value: Value) -> Result<()>;

    fn delete(&self, key: &str) -> Result<bool>;

    fn has_key(&self, key: &str) -> Result<bool>;

    fn get_all(&self) -> Result<BTreeMap<String, Value>>;

    fn clear(&self) -> Result<BTreeMap<String, Value>>;

    fn flush(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}
