//! Exclusive ownership of the cargo target directory for one run.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs_err as fs;
use reprobuild_types::schema::REPROBUILD_LOCK_V1;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use tracing::debug;

pub const LOCK_FILE_NAME: &str = ".reprobuild.lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    pub schema: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub command: String,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "cargo target dir is locked by another run: {command} (PID {pid}, started {started_at})\n\
         lock file: {lock_path}"
    )]
    Contention {
        command: String,
        pid: u32,
        started_at: String,
        lock_path: Utf8PathBuf,
    },

    #[error(
        "cargo target dir is locked by another run (holder not recorded yet)\n\
         lock file: {lock_path}"
    )]
    ContentionUnknown { lock_path: Utf8PathBuf },

    #[error("create lock file {lock_path}: {source}")]
    Create {
        lock_path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the duration of a run.
///
/// The exclusion is an OS advisory lock on the open lock file, so it goes
/// away with the holder's process however that process ends. The JSON
/// metadata in the file only feeds the contention message.
#[derive(Debug)]
pub struct TargetDirLock {
    file: fs::File,
    lock_path: Utf8PathBuf,
}

impl TargetDirLock {
    /// Lock `<dir>/.reprobuild.lock` without blocking and record who holds it.
    pub fn acquire(dir: &Utf8Path, command: &str) -> Result<Self, LockError> {
        let lock_path = dir.join(LOCK_FILE_NAME);
        fs::create_dir_all(dir).map_err(|source| LockError::Create {
            lock_path: lock_path.clone(),
            source,
        })?;

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path.as_std_path())
            .map_err(|source| LockError::Create {
                lock_path: lock_path.clone(),
                source,
            })?;

        if let Err(err) = try_lock_exclusive(file.file()) {
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(read_contention_error(&lock_path));
            }
            return Err(LockError::Create {
                lock_path,
                source: err,
            });
        }

        let metadata = LockMetadata {
            schema: REPROBUILD_LOCK_V1.to_string(),
            pid: std::process::id(),
            started_at: Utc::now(),
            command: command.to_string(),
        };
        if let Err(source) = write_metadata(file.file(), &metadata) {
            return Err(LockError::Create { lock_path, source });
        }

        debug!(lock = %lock_path, "acquired target dir lock");
        Ok(TargetDirLock { file, lock_path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.lock_path
    }

    /// Read the metadata back through the held handle.
    pub fn read_metadata(&self) -> io::Result<LockMetadata> {
        let mut file = self.file.file();
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).map_err(io::Error::other)
    }
}

fn write_metadata(file: &File, metadata: &LockMetadata) -> io::Result<()> {
    file.set_len(0)?;
    let mut writer = file;
    writer.seek(SeekFrom::Start(0))?;
    serde_json::to_writer_pretty(&mut writer, metadata).map_err(io::Error::other)?;
    writer.flush()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    file.try_lock().map_err(|err| match err {
        std::fs::TryLockError::WouldBlock => io::ErrorKind::WouldBlock.into(),
        std::fs::TryLockError::Error(err) => err,
    })
}

fn read_contention_error(lock_path: &Utf8Path) -> LockError {
    match fs::read_to_string(lock_path)
        .ok()
        .and_then(|contents| serde_json::from_str::<LockMetadata>(&contents).ok())
    {
        Some(metadata) => LockError::Contention {
            command: metadata.command,
            pid: metadata.pid,
            started_at: metadata.started_at.to_rfc3339(),
            lock_path: lock_path.to_path_buf(),
        },
        None => LockError::ContentionUnknown {
            lock_path: lock_path.to_path_buf(),
        },
    }
}
