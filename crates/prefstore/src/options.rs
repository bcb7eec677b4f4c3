//! Open options for a preferences instance.

use crate::backend::StorageKind;
use prefstore_common::StoreConfig;
use std::path::PathBuf;

/// Options describing one preferences file.
///
/// Immutable once the instance is constructed. `storage_type` is an explicit
/// request; the manager only honors it when the on-disk evidence does not
/// contradict it (an existing file's format always wins).
#[derive(Clone, Debug)]
pub struct Options {
    /// Absolute path to the primary preferences file
    pub file_path: PathBuf,
    /// Owning bundle name, matched against the manager's enhance allow-list
    pub bundle_name: String,
    /// Group-shared directory id; when set, document I/O runs under an
    /// advisory file lock so sibling processes can share the file
    pub data_group_id: Option<String>,
    /// Explicitly requested storage engine, if any
    pub storage_type: Option<StorageKind>,
    /// Size limits for keys, values, and paths
    pub config: StoreConfig,
}

impl Options {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            bundle_name: String::new(),
            data_group_id: None,
            storage_type: None,
            config: StoreConfig::default(),
        }
    }

    #[must_use]
    pub fn bundle_name(mut self, name: impl Into<String>) -> Self {
        self.bundle_name = name.into();
        self
    }

    #[must_use]
    pub fn data_group_id(mut self, id: impl Into<String>) -> Self {
        self.data_group_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn storage_type(mut self, kind: StorageKind) -> Self {
        self.storage_type = Some(kind);
        self
    }

    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }
}
