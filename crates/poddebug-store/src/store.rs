//! File-backed session store with advisory locking
//!
//! One JSON file per identity key under `<home>/sessions/`, plus a `.lock`
//! file per key carrying an exclusive `flock` so that start/stop/info
//! invocations from unrelated processes serialize.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::session::{DebugSession, SessionKey};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid session key: {0}")]
    InvalidKey(String),

    #[error("Failed to write session record at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt session record at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to lock session {key}: {source}")]
    Lock {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Could not resolve the poddebug home directory")]
    NoHomeDir,
}

/// Durable, cross-process-visible mapping from identity key to session record
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Open the store under the default home directory
    ///
    /// `$PODDEBUG_HOME` overrides the location, otherwise `~/.poddebug` is
    /// used; records live in its `sessions/` subdirectory.
    pub fn new() -> Result<Self, StoreError> {
        Self::with_base_dir(Self::default_base_dir()?)
    }

    /// Open the store under an explicit directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|source| StoreError::Write {
            path: base_dir.clone(),
            source,
        })?;
        Ok(Self { base_dir })
    }

    fn default_base_dir() -> Result<PathBuf, StoreError> {
        if let Some(home) = std::env::var_os("PODDEBUG_HOME") {
            if !home.is_empty() {
                return Ok(PathBuf::from(home).join("sessions"));
            }
        }
        let home = dirs::home_dir().ok_or(StoreError::NoHomeDir)?;
        Ok(home.join(".poddebug").join("sessions"))
    }

    fn record_path(&self, key: &SessionKey) -> PathBuf {
        self.base_dir.join(format!("{}.json", key.file_stem()))
    }

    fn lock_path(&self, key: &SessionKey) -> PathBuf {
        self.base_dir.join(format!("{}.lock", key.file_stem()))
    }

    /// Write or overwrite the record for a key
    ///
    /// The record goes to a sibling temp file first and is renamed into
    /// place, so a crash mid-write never leaves a truncated record that
    /// later reads would report as corrupt.
    pub fn put(&self, key: &SessionKey, session: &DebugSession) -> Result<(), StoreError> {
        let path = self.record_path(key);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", key.file_stem()));
        let json = serde_json::to_string_pretty(session).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        fs::write(&tmp_path, json).map_err(|source| StoreError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(key = %key, path = %path.display(), "wrote session record");
        Ok(())
    }

    /// Read the record for a key; absence is not an error
    pub fn get(&self, key: &SessionKey) -> Result<Option<DebugSession>, StoreError> {
        let path = self.record_path(key);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Corrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let session = serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            path,
            reason: e.to_string(),
        })?;

        Ok(Some(session))
    }

    /// Remove the record for a key; no-op when absent
    pub fn delete(&self, key: &SessionKey) -> Result<(), StoreError> {
        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key, "deleted session record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Write { path, source }),
        }
    }

    /// Acquire the exclusive per-key lock, blocking until available
    ///
    /// The lock is advisory and cross-process; it is released when the
    /// returned guard drops, on every exit path.
    pub fn lock(&self, key: &SessionKey) -> Result<StoreLock, StoreError> {
        let path = self.lock_path(key);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Lock {
                key: key.to_string(),
                source,
            })?;

        flock_exclusive(&file).map_err(|source| StoreError::Lock {
            key: key.to_string(),
            source,
        })?;

        debug!(key = %key, "acquired session lock");
        Ok(StoreLock { _file: file })
    }

    /// Base directory holding the records, for display
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// Guard holding an exclusive advisory lock on one session key
///
/// Dropping the guard releases the lock.
pub struct StoreLock {
    _file: File,
}

/// Acquire an exclusive flock on a file, blocking until granted
#[cfg(unix)]
fn flock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    loop {
        // SAFETY: flock is a standard POSIX call; fd is a valid descriptor
        // owned by `file` for the lifetime of this call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> io::Result<()> {
    // Advisory locking is not available; single-process use still works.
    Ok(())
}
