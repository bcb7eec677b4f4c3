//! Size limits for keys, values, and paths.
//!
//! The defaults match the documented contract; tests shrink them to
//! exercise limit handling without multi-megabyte fixtures.

use serde::{Deserialize, Serialize};

/// Per-instance size limits, carried on `Options`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum key length in bytes
    pub max_key_length: usize,
    /// Maximum serialized value size in bytes
    pub max_value_size: usize,
    /// Serialized size at which the KV engine starts caching a value
    pub large_value_threshold: usize,
    /// Maximum file path length in bytes
    pub max_path_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_key_length: 1024,
            max_value_size: 16 * 1024 * 1024, // 16 MiB
            large_value_threshold: 512 * 1024, // 512 KiB
            max_path_length: 4096,
        }
    }
}
