// SPDX-License-Identifier: GPL-3.0-only
//! Single-instance lock
//!
//! Two daemons driving the same control bus would interleave helper calls,
//! so the daemon takes an exclusive `flock` on a file in the runtime
//! directory and keeps it for its whole lifetime.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::config::APP_DIR;
use crate::error::{AppError, Result};

#[derive(Debug)]
pub struct InstanceLock {
    // Released when the file is closed
    _file: File,
}

impl InstanceLock {
    /// `$XDG_RUNTIME_DIR/easy-brightness.lock`, or under `/tmp`
    pub fn default_path() -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(format!("{APP_DIR}.lock"))
    }

    /// Take the lock at `path` without blocking
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = File::create(path)?;

        let lock_result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if lock_result != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(AppError::AlreadyRunning(path.to_path_buf()));
            }
            return Err(err.into());
        }

        info!("Acquired instance lock {}", path.display());
        Ok(Self { _file: file })
    }
}
