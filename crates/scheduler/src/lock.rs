//! Host-local exclusive lock for the dispatcher
//!
//! The marker is a file created with `create_new`, holding the owner's pid
//! and acquisition time. A marker left behind by a crashed process is not
//! detected; remove it by hand once that process is confirmed gone.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Contents of the marker file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another dispatcher holds the marker
    #[error("lock {} is already held{}", .path.display(), holder_suffix(.holder))]
    AlreadyHeld {
        path: PathBuf,
        holder: Option<LockInfo>,
    },

    #[error("lock io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn holder_suffix(holder: &Option<LockInfo>) -> String {
    holder
        .as_ref()
        .map(|h| format!(" by pid {}", h.pid))
        .unwrap_or_default()
}

/// Creates and inspects the marker at a fixed path
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker, failing with [`LockError::AlreadyHeld`] if it exists.
    pub fn acquire(&self) -> Result<LockGuard, LockError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                let info = LockInfo {
                    pid: std::process::id(),
                    acquired_at: Utc::now(),
                };
                // The marker's existence is the lock; its contents are informational
                if let Ok(payload) = serde_json::to_vec(&info) {
                    if let Err(e) = file.write_all(&payload).and_then(|_| file.sync_all()) {
                        warn!(path = %self.path.display(), error = %e, "Failed to write lock contents");
                    }
                }
                debug!(path = %self.path.display(), pid = info.pid, "Lock acquired");
                Ok(LockGuard {
                    path: self.path.clone(),
                    info,
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LockError::AlreadyHeld {
                    path: self.path.clone(),
                    holder: self.holder(),
                })
            }
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Who holds the marker, if it exists and is readable
    pub fn holder(&self) -> Option<LockInfo> {
        let raw = fs::read(&self.path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    fn io_error(&self, source: std::io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Owned marker; removed on [`release`](Self::release) or drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl LockGuard {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker now and report any failure
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Lock released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}
