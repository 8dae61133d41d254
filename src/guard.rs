//! Locked read-modify-write cycles against a backing CSV file.
//!
//! Each backing file `dir/name.csv` has a sibling lock artifact
//! `dir/name.csv.lock` carrying an advisory exclusive lock. The lock path is
//! built from the canonical parent directory, so equally named files in
//! different directories never contend. Writes go to a temporary file in the
//! same directory and are renamed over the target, so readers only ever see
//! a complete table.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::downloader;
use crate::error::{EditorError, Result};
use crate::store::RecordStore;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const LOCK_SUFFIX: &str = ".lock";
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Path of the lock artifact that guards `path`.
///
/// The parent directory must exist; the file itself need not.
pub fn lock_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let name = path.file_name().ok_or_else(|| {
        EditorError::load(path, "path does not name a file")
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut lock_name = name.to_os_string();
    lock_name.push(LOCK_SUFFIX);
    Ok(fs::canonicalize(parent)?.join(lock_name))
}

/// True if `path` is a lock artifact rather than a table.
pub fn is_lock_artifact(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(LOCK_SUFFIX))
        .unwrap_or(false)
}

/// Path of the backing file a lock artifact guards.
pub fn guarded_path(lock: impl AsRef<Path>) -> Option<PathBuf> {
    let lock = lock.as_ref();
    let name = lock.file_name()?.to_str()?;
    let stem = name.strip_suffix(LOCK_SUFFIX)?;
    Some(lock.with_file_name(stem))
}

fn open_lock(lock: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock)
}

/// Take the lock for `path` without waiting.
///
/// Returns `Ok(None)` while another caller holds it.
pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<LockHandle>> {
    let lock = lock_path(path)?;
    let file = open_lock(&lock)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(LockHandle { file, path: lock })),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Held exclusive lock; released when dropped.
#[derive(Debug)]
pub struct LockHandle {
    file: File,
    path: PathBuf,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Serializes access to backing files with a bounded wait.
#[derive(Debug, Clone)]
pub struct PersistenceGuard {
    timeout: Duration,
}

impl Default for PersistenceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl PersistenceGuard {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until the lock for `path` is held or the timeout expires.
    ///
    /// # Arguments
    /// * `path` - The backing file to lock; it need not exist yet
    ///
    /// # Returns
    /// * `Ok(LockHandle)` - The held lock, released when dropped
    /// * `Err(EditorError::LockTimeout)` - Another caller held the lock for
    ///   the whole timeout
    pub fn acquire(&self, path: impl AsRef<Path>) -> Result<LockHandle> {
        let path = path.as_ref();
        let lock = lock_path(path)?;
        let file = open_lock(&lock)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(
                        "locked {} after {:?}",
                        lock.display(),
                        started.elapsed()
                    );
                    return Ok(LockHandle { file, path: lock });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let waited = started.elapsed();
                    if waited >= self.timeout {
                        return Err(EditorError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(self.timeout - waited));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run `operation` while holding the lock for `path`.
    ///
    /// The lock is released when `operation` returns, whether it succeeded
    /// or not.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use vocab_editor::PersistenceGuard;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let guard = PersistenceGuard::new(Duration::from_secs(1));
    /// let answer = guard.with_lock(dir.path().join("words.csv"), || Ok(42)).unwrap();
    /// assert_eq!(answer, 42);
    /// ```
    pub fn with_lock<T, F>(&self, path: impl AsRef<Path>, operation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _lock = self.acquire(path)?;
        operation()
    }

    /// Load the store at `path`, transform it and write the result back,
    /// all under one lock acquisition. Nothing is written if `edit` fails.
    ///
    /// # Arguments
    /// * `path` - The backing file
    /// * `edit` - Gets the loaded store, returns the store to write and a
    ///   value handed back to the caller
    ///
    /// # Examples
    /// ```
    /// use vocab_editor::{Field, PersistenceGuard, RecordStore};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let path = dir.path().join("words.csv");
    /// std::fs::write(&path, "word,number,old_definition,translation,definition,example_sentences,part_of_speech,collocations\ncat,1,,,,,,\n").unwrap();
    ///
    /// let groups = PersistenceGuard::default()
    ///     .update(&path, |store| {
    ///         let mut group = store.groups()[0].clone();
    ///         group.records[0].set(Field::Translation, "Katze");
    ///         let count = store.len();
    ///         Ok((store.with_group(0, group), count))
    ///     })
    ///     .unwrap();
    /// assert_eq!(groups, 1);
    /// let saved = RecordStore::load(&path).unwrap();
    /// assert_eq!(saved.groups()[0].records[0].get(Field::Translation), "Katze");
    /// ```
    pub fn update<T, F>(&self, path: impl AsRef<Path>, edit: F) -> Result<T>
    where
        F: FnOnce(RecordStore) -> Result<(RecordStore, T)>,
    {
        let path = path.as_ref();
        self.with_lock(path, || {
            let store = RecordStore::load(path)?;
            let (store, output) = edit(store)?;
            write(path, &store)?;
            Ok(output)
        })
    }
}

/// Atomically replace `path` with the store's records, sorted by sequence.
///
/// Readers see either the old file or the new one. The caller is expected
/// to hold the lock for `path`.
pub fn write(path: impl AsRef<Path>, store: &RecordStore) -> Result<()> {
    let path = path.as_ref();
    write_bytes(path, downloader::to_csv(store).as_bytes())?;
    info!(
        "saved {} records in {} groups to {}",
        store.record_count(),
        store.len(),
        path.display()
    );
    Ok(())
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into place.
pub fn write_bytes(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
