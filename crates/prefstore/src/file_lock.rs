//! Advisory file lock for group-shared preferences directories.
//!
//! When a store carries a data group id, several processes may touch the
//! same document file; load, flush, and delete serialize on an exclusive
//! flock over a `.lock` sibling file. Unlock happens on drop. On non-Unix
//! targets the lock degrades to opening the file (single-process use).

use prefstore_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;

#[cfg(unix)]
use nix::fcntl::{Flock, FlockArg};

/// Exclusive advisory lock over a lock file; released on drop.
pub struct FileLock {
    #[cfg(unix)]
    _flock: Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is acquired.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            let flock = Flock::lock(file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| Error::storage(errno))?;
            Ok(Self { _flock: flock })
        }
        #[cfg(not(unix))]
        {
            Ok(Self { _file: file })
        }
    }
}
