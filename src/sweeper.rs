//! Retention sweep over the upload directory.
//!
//! A lock artifact is never expired by its own age: it is created once and
//! never written again, while its table is refreshed on every save. Locks are
//! removed together with their expired table, or on their own only once the
//! table is gone. A table whose lock is currently held is left alone.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};

use crate::error::Result;
use crate::guard;

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl SweepReport {
    fn fail(&mut self, path: &Path, reason: impl ToString) {
        let reason = reason.to_string();
        warn!("failed to sweep {}: {}", path.display(), reason);
        self.failed.push((path.to_path_buf(), reason));
    }
}

/// Delete files in `dir` last modified more than `retention` ago, along
/// with their lock artifacts.
///
/// Files that disappear mid-sweep are ignored. Any other per-file failure is
/// logged and recorded, and the sweep moves on. Only an unreadable
/// directory fails the whole sweep.
///
/// # Arguments
/// * `dir` - The upload directory
/// * `retention` - How long a file may go unmodified before it is removed
///
/// # Returns
/// * `Ok(SweepReport)` - Removed paths and per-file failures
/// * `Err(EditorError::Io)` - `dir` could not be listed
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use vocab_editor::sweeper::sweep;
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("words.csv"), "word\n").unwrap();
/// let report = sweep(dir.path(), Duration::from_secs(3600)).unwrap();
/// assert!(report.removed.is_empty());
/// ```
pub fn sweep(dir: impl AsRef<Path>, retention: Duration) -> Result<SweepReport> {
    let dir = dir.as_ref();
    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut report = SweepReport::default();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        let modified = match entry.metadata().and_then(|meta| {
            if meta.is_file() {
                meta.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => modified,
            Ok(None) => continue,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                report.fail(&path, e);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        if guard::is_lock_artifact(&path) {
            match guard::guarded_path(&path) {
                Some(table) if !table.exists() => expire(&table, &mut report, false),
                _ => {}
            }
        } else {
            expire(&path, &mut report, true);
        }
    }

    Ok(report)
}

// Remove `table` (when `with_table`) and its lock while holding that lock.
fn expire(table: &Path, report: &mut SweepReport, with_table: bool) {
    let lock = match guard::lock_path(table) {
        Ok(lock) => lock,
        Err(e) => return report.fail(table, e),
    };
    let handle = match guard::try_acquire(table) {
        Ok(Some(handle)) => handle,
        Ok(None) => {
            debug!("{} is in use, keeping it", table.display());
            return;
        }
        Err(e) => return report.fail(&lock, e),
    };

    if with_table {
        match remove_if_present(table) {
            Ok(true) => {
                info!("swept expired file {}", table.display());
                report.removed.push(table.to_path_buf());
            }
            Ok(false) => {}
            Err(e) => return report.fail(table, e),
        }
    }
    match remove_if_present(&lock) {
        Ok(true) => report.removed.push(lock),
        Ok(false) => {}
        Err(e) => report.fail(&lock, e),
    }
    drop(handle);
}

// Ok(false) when the file was already gone.
fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::PersistenceGuard;
    use std::fs::File;

    fn age(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn old_files_and_their_locks_go_new_files_stay() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.csv");
        let old_lock = dir.path().join("old.csv.lock");
        let fresh = dir.path().join("fresh.csv");
        for path in [&old, &old_lock, &fresh] {
            fs::write(path, "x").unwrap();
        }
        age(&old, Duration::from_secs(7200));

        let report = sweep(dir.path(), Duration::from_secs(3600)).unwrap();
        assert!(!old.exists());
        assert!(!old_lock.exists());
        assert!(fresh.exists());
        assert_eq!(report.removed.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn old_lock_of_a_fresh_table_survives() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live.csv");
        fs::write(&live, "x").unwrap();
        let guard = PersistenceGuard::new(Duration::from_millis(100));
        let held = guard.acquire(&live).unwrap();
        let lock = dir.path().join("live.csv.lock");
        age(&lock, Duration::from_secs(48 * 3600));

        let report = sweep(dir.path(), Duration::from_secs(24 * 3600)).unwrap();
        assert!(report.removed.is_empty());
        assert!(lock.exists());
        // Still one lock: a second caller must wait for the first.
        assert!(guard.acquire(&live).is_err());
        drop(held);
        assert!(guard.acquire(&live).is_ok());
    }

    #[test]
    fn expired_table_in_use_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("busy.csv");
        fs::write(&table, "x").unwrap();
        let held = PersistenceGuard::default().acquire(&table).unwrap();
        age(&table, Duration::from_secs(7200));

        let report = sweep(dir.path(), Duration::from_secs(3600)).unwrap();
        assert!(table.exists());
        assert!(report.removed.is_empty());
        drop(held);

        sweep(dir.path(), Duration::from_secs(3600)).unwrap();
        assert!(!table.exists());
    }

    #[test]
    fn orphaned_locks_expire_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("gone.csv.lock");
        let recent = dir.path().join("pending.csv.lock");
        fs::write(&stale, "").unwrap();
        fs::write(&recent, "").unwrap();
        age(&stale, Duration::from_secs(7200));

        sweep(dir.path(), Duration::from_secs(3600)).unwrap();
        assert!(!stale.exists());
        assert!(recent.exists());
    }

    #[test]
    fn one_failure_does_not_stop_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        fs::write(&first, "x").unwrap();
        fs::write(&second, "x").unwrap();
        // A directory where the lock artifact should be cannot be locked.
        fs::create_dir(dir.path().join("a.csv.lock")).unwrap();
        age(&first, Duration::from_secs(7200));
        age(&second, Duration::from_secs(7200));

        let report = sweep(dir.path(), Duration::from_secs(3600)).unwrap();
        assert!(first.exists());
        assert!(!second.exists());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("a.csv.lock"));
    }

    #[test]
    fn directories_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        let report = sweep(dir.path(), Duration::ZERO).unwrap();
        assert!(dir.path().join("nested").exists());
        assert!(report.removed.is_empty());
    }

    #[test]
    fn missing_directory_fails_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sweep(dir.path().join("absent"), Duration::ZERO).is_err());
    }
}
