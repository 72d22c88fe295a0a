//! Storage operations on the shared directory
//!
//! Every operation that touches a single name runs under that name's lock
//! from the [`LockRegistry`]: downloads hold a read lock for the whole
//! transfer, uploads and deletes hold the write lock. Listing is not locked.
//!
//! Uploads are staged in a sibling `<name>.depot-part` file and renamed onto
//! the target only after the declared byte count has arrived, so a reader sees
//! either the previous complete file or the new one.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Take};
use tracing::{debug, info, warn};

use depot_core::path::{self, is_temp_name};
use depot_core::{ErrorCode, FileEntry, LockConfig, ProtocolError, StorageConfig};

use crate::lock::{ReadGuard, WriteGuard};
use crate::registry::LockRegistry;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is a directory")]
    IsDirectory(String),

    #[error(transparent)]
    InvalidName(#[from] ProtocolError),

    #[error("upload of {name} ended after {received} of {expected} bytes")]
    ShortUpload {
        name: String,
        expected: u64,
        received: u64,
    },

    #[error("upload of {name} exceeds its declared {expected} bytes")]
    Overflow { name: String, expected: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Wire code reported to the client
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::NotFound(_) => ErrorCode::NotFound,
            StorageError::IsDirectory(_) => ErrorCode::IsDirectory,
            StorageError::InvalidName(e) => ErrorCode::from(e),
            StorageError::ShortUpload { .. } | StorageError::Overflow { .. } => ErrorCode::Io,
            StorageError::Io(e) => ErrorCode::from_io(e),
        }
    }
}

/// The shared directory plus the locks guarding its names
pub struct Storage {
    root: PathBuf,
    locks: LockRegistry,
    chunk_size: usize,
}

impl Storage {
    /// Open the storage root, creating it if needed and clearing uploads a
    /// previous process left half-written.
    pub fn open(config: &StorageConfig, locks: LockConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&config.root)?;

        let storage = Self {
            root: config.root.clone(),
            locks: LockRegistry::new(locks),
            chunk_size: config.transfer_chunk_size.max(1),
        };

        let swept = storage.sweep_stale_uploads()?;
        if swept > 0 {
            info!("Removed {} stale partial upload(s) from {:?}", swept, storage.root);
        }

        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Buffer size for streaming file contents
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// List stored files with their current sizes, sorted by name.
    ///
    /// Not coordinated with writers: a size may lag a replace that commits
    /// while the directory is being read.
    pub async fn list(&self) -> Result<Vec<FileEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    debug!("Skipping non-UTF-8 name {:?}", raw);
                    continue;
                }
            };

            if is_temp_name(&name) {
                continue;
            }

            match fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_file() => entries.push(FileEntry::new(name, meta.len())),
                Ok(_) => {}
                Err(e) => debug!("{} vanished while listing: {}", name, e),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Whether something is stored under `name` (unlocked check)
    pub async fn contains(&self, name: &str) -> bool {
        match path::resolve(&self.root, name) {
            Ok(path) => fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Take the read lock on `name` and open it for streaming
    pub async fn open_read(&self, name: &str) -> Result<Download, StorageError> {
        let target = path::resolve(&self.root, name)?;
        let guard = self.locks.resolve(name).read().await;

        let file = match File::open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(StorageError::IsDirectory(name.to_string()));
        }

        let size = meta.len();
        debug!("Opened {} for download ({} bytes)", name, size);

        Ok(Download {
            name: name.to_string(),
            size,
            file: file.take(size),
            _guard: guard,
        })
    }

    /// Take the write lock on `name` and stage an upload of `size` bytes
    pub async fn begin_upload(&self, name: &str, size: u64) -> Result<Upload, StorageError> {
        let target = path::resolve(&self.root, name)?;
        let guard = self.locks.resolve(name).write().await;

        if let Ok(meta) = fs::metadata(&target).await {
            if meta.is_dir() {
                return Err(StorageError::IsDirectory(name.to_string()));
            }
        }

        let temp = path::temp_path(&self.root, name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)
            .await?;

        debug!("Staging upload of {} ({} bytes) in {:?}", name, size, temp);

        Ok(Upload {
            name: name.to_string(),
            target,
            temp,
            file: Some(file),
            expected: size,
            received: 0,
            finished: false,
            _guard: guard,
        })
    }

    /// Remove `name` under its write lock
    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let target = path::resolve(&self.root, name)?;

        if !self.contains(name).await {
            return Err(StorageError::NotFound(name.to_string()));
        }

        let result = {
            let lock = self.locks.resolve(name);
            let _guard = lock.write().await;
            remove_file_locked(name, &target).await
        };

        self.locks.evict_if_idle(name);

        if result.is_ok() {
            info!("Deleted {}", name);
        }
        result
    }

    /// Remove `*.depot-part` files left behind by an earlier process
    pub fn sweep_stale_uploads(&self) -> Result<usize, StorageError> {
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let is_temp = entry
                .file_name()
                .to_str()
                .map(is_temp_name)
                .unwrap_or(false);

            if is_temp && entry.file_type()?.is_file() {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Could not remove stale upload {:?}: {}", entry.path(), e),
                }
            }
        }

        Ok(removed)
    }
}

async fn remove_file_locked(name: &str, target: &Path) -> Result<(), StorageError> {
    let meta = match fs::symlink_metadata(target).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound(name.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    if meta.is_dir() {
        return Err(StorageError::IsDirectory(name.to_string()));
    }

    match fs::remove_file(target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(StorageError::NotFound(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// An open file being streamed to a client; holds the read lock
pub struct Download {
    name: String,
    size: u64,
    file: Take<File>,
    _guard: ReadGuard,
}

impl Download {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size captured when the file was opened under the lock
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the next chunk; `Ok(0)` once `size` bytes were produced
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf).await
    }
}

/// An upload being staged; holds the write lock.
///
/// Dropping it without [`Upload::commit`] discards the staged bytes and leaves
/// any existing file untouched.
pub struct Upload {
    name: String,
    target: PathBuf,
    temp: PathBuf,
    file: Option<File>,
    expected: u64,
    received: u64,
    finished: bool,
    _guard: WriteGuard,
}

impl Upload {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn remaining(&self) -> u64 {
        self.expected - self.received
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Append a chunk to the staged file
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        if chunk.len() as u64 > self.remaining() {
            return Err(StorageError::Overflow {
                name: self.name.clone(),
                expected: self.expected,
            });
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "upload already closed"))?;
        file.write_all(chunk).await?;
        self.received += chunk.len() as u64;
        Ok(())
    }

    /// Sync the staged file and atomically rename it onto the target.
    ///
    /// Fails without touching the target if fewer bytes than declared arrived.
    pub async fn commit(mut self) -> Result<u64, StorageError> {
        if self.received != self.expected {
            return Err(StorageError::ShortUpload {
                name: self.name.clone(),
                expected: self.expected,
                received: self.received,
            });
        }

        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        fs::rename(&self.temp, &self.target).await?;
        self.finished = true;

        info!("Stored {} ({} bytes)", self.name, self.received);
        Ok(self.received)
    }

    /// Discard the staged bytes
    pub async fn abort(mut self) {
        self.file.take();
        match fs::remove_file(&self.temp).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial upload {:?}: {}", self.temp, e),
        }
        self.finished = true;
        debug!(
            "Discarded upload of {} after {} of {} bytes",
            self.name, self.received, self.expected
        );
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        self.file.take();
        match std::fs::remove_file(&self.temp) {
            Ok(()) => debug!("Discarded partial upload of {}", self.name),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial upload {:?}: {}", self.temp, e),
        }
    }
}
