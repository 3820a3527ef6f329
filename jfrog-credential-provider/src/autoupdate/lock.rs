//! One update pipeline per node. The kubelet spawns a provider process per
//! image pull, so many invocations can race toward the same update; a
//! non-blocking exclusive lock on a sidecar file next to the binary lets
//! exactly one of them proceed while the rest skip their attempt.

use crate::error::{self, Result};
use fs2::FileExt;
use log::{debug, warn};
use snafu::ResultExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Holds the advisory lock for one update attempt. The lock is released when
/// the guard drops, and the kernel releases it regardless if the process
/// dies with the file descriptor open.
#[derive(Debug)]
pub(crate) struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Attempts to take the lock without blocking. A held lock surfaces as
    /// `Error::LockBusy`, which callers treat as "another invocation is
    /// already updating" rather than a failure.
    pub(crate) fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .context(error::LockOpenSnafu { path: path.clone() })?;
        file.try_lock_exclusive()
            .context(error::LockBusySnafu { path: path.clone() })?;
        debug!("Obtained exclusive update lock on {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(
                "Failed to release update lock {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
