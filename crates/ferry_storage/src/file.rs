//! File-based record store for durable state.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                 # Advisory lock for single-writer
//! ├─ <hex(key)>.rec       # One file per record
//! └─ <hex(key)>.rec.tmp   # Transient, only during a write
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, RecordStore};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const RECORD_EXT: &str = "rec";
const TEMP_SUFFIX: &str = ".tmp";

/// Options for opening a [`FileStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
    /// Whether to fsync every write (safer but slower).
    pub sync_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

/// A file-based record store.
///
/// Every record lives in its own file. Writes use the write-then-rename
/// pattern, so a crash mid-write leaves the previous record intact:
/// 1. Write to `<name>.rec.tmp`
/// 2. Sync the temporary file to disk
/// 3. Rename it over `<name>.rec`
/// 4. Fsync the directory so the rename is durable
///
/// # Thread Safety
///
/// The store holds an exclusive lock on its directory for its whole
/// lifetime; a second `open` of the same directory fails with
/// [`StorageError::Locked`]. Within the process, writes are serialized by
/// an internal mutex.
///
/// # Example
///
/// ```no_run
/// use ferry_storage::{FileStore, RecordStore, StoreConfig};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("state"), StoreConfig::default()).unwrap();
/// store.put("meta/mode", b"cloud").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    config: StoreConfig,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock
    /// - I/O errors occur
    pub fn open(path: &Path, config: StoreConfig) -> StorageResult<Self> {
        if !path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StorageError::Missing {
                    path: path.display().to_string(),
                });
            }
        }

        if !path.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.display().to_string(),
            });
        }

        let store = Self {
            path: path.to_path_buf(),
            config,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        };
        store.remove_stale_temp_files()?;
        Ok(store)
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}.{RECORD_EXT}", encode_key(key)))
    }

    /// Deletes temporary files left behind by a crash mid-write.
    fn remove_stale_temp_files(&self) -> StorageResult<()> {
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TEMP_SUFFIX) {
                debug!(file = %name.to_string_lossy(), "removing stale temp record");
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let mut file = match File::open(self.record_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let final_path = self.record_path(key);
        let mut temp_name = final_path.clone().into_os_string();
        temp_name.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        let mut file = File::create(&temp_path)?;
        file.write_all(value)?;
        if self.config.sync_on_write {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        if self.config.sync_on_write {
            self.sync_directory()?;
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => {
                if self.config.sync_on_write {
                    self.sync_directory()?;
                }
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn sync(&self) -> StorageResult<()> {
        self.sync_directory()
    }
}

/// Hex-encodes a key so any string maps to a portable file name.
fn encode_key(key: &str) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(key.len() * 2);
    for byte in key.as_bytes() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    if name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(name.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
