//! Advisory locking of the bulker config document.
//!
//! Inspection commands hold a shared lock; commands that modify the crate
//! registry hold an exclusive one. The lock lives in a sidecar file next to the
//! config (`bulker_config.yaml.lock`) so the config itself can be replaced atomically.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use rustix::fs::{FlockOperation, flock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub started_at_unix: u64,
    pub command: String,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "Bulker config is locked by another process: {command} (PID {pid}, started at Unix timestamp {started_at_unix})\n\
         If you're sure no bulker process is running, remove the lock file:\n  {}",
        lock_path.display()
    )]
    Contention {
        command: String,
        pid: u32,
        started_at_unix: u64,
        lock_path: PathBuf,
    },

    #[error(
        "Bulker config is locked by another process\n\
         If you're sure no bulker process is running, remove the lock file:\n  {}",
        lock_path.display()
    )]
    ContentionUnknown { lock_path: PathBuf },

    #[error("Failed to open lock file {}: {source}", lock_path.display())]
    OpenFile {
        lock_path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write lock metadata: {0}")]
    WriteMetadata(#[source] io::Error),

    #[error("Failed to acquire lock: {0}")]
    LockFailed(#[source] io::Error),
}

/// A held lock on a config file. Released on drop.
#[derive(Debug)]
pub struct ConfigLock {
    file: File,
    lock_path: PathBuf,
    mode: LockMode,
}

impl ConfigLock {
    /// Locks the config at `config_path` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Contention`] if another process holds a conflicting lock.
    pub fn acquire(config_path: &Path, mode: LockMode) -> Result<Self, LockError> {
        let lock_path = lock_path_for(config_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| LockError::OpenFile {
                lock_path: lock_path.clone(),
                source,
            })?;
        let mut lock = ConfigLock { file, lock_path, mode };
        lock.lock(mode)?;
        Ok(lock)
    }

    /// Converts a shared lock into an exclusive one. A no-op if already exclusive.
    pub fn upgrade(&mut self) -> Result<(), LockError> {
        if self.mode == LockMode::Exclusive {
            return Ok(());
        }
        self.lock(LockMode::Exclusive)?;
        self.mode = LockMode::Exclusive;
        Ok(())
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn read_metadata(&self) -> io::Result<LockMetadata> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).map_err(io::Error::other)
    }

    fn lock(&mut self, mode: LockMode) -> Result<(), LockError> {
        let operation = match mode {
            LockMode::Shared => FlockOperation::NonBlockingLockShared,
            LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
        };
        if let Err(errno) = flock(self.file.as_fd(), operation) {
            let err = io::Error::from_raw_os_error(errno.raw_os_error());
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(contention_error(&self.lock_path));
            }
            return Err(LockError::LockFailed(err));
        }
        if mode == LockMode::Exclusive {
            self.write_metadata()?;
        }
        Ok(())
    }

    fn write_metadata(&mut self) -> Result<(), LockError> {
        let metadata = LockMetadata {
            pid: std::process::id(),
            started_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
        };
        self.file.set_len(0).map_err(LockError::WriteMetadata)?;
        self.file.seek(SeekFrom::Start(0)).map_err(LockError::WriteMetadata)?;
        serde_json::to_writer_pretty(&mut self.file, &metadata)
            .map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
        self.file.flush().map_err(LockError::WriteMetadata)
    }
}

fn lock_path_for(config_path: &Path) -> PathBuf {
    let mut name = config_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    config_path.with_file_name(name)
}

fn contention_error(lock_path: &Path) -> LockError {
    if let Ok(mut file) = File::open(lock_path) {
        let mut contents = String::new();
        if file.read_to_string(&mut contents).is_ok()
            && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
        {
            return LockError::Contention {
                command: metadata.command,
                pid: metadata.pid,
                started_at_unix: metadata.started_at_unix,
                lock_path: lock_path.to_path_buf(),
            };
        }
    }
    LockError::ContentionUnknown { lock_path: lock_path.to_path_buf() }
}
