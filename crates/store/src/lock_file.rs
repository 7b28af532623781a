use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt as _;
use log::warn;

use crate::error::{Result, StoreError};

/// Presence-detection lock for one database directory.
///
/// The lock file is created on open and removed on clean close. A lock file
/// that is present at open time and still held by a live process makes the
/// open fail with [`StoreError::AlreadyInUse`]; a stale file left behind by
/// a crashed process is removed and re-taken.
pub struct DatabaseLock {
    path: Arc<PathBuf>,
    lock: Option<File>,
}

impl DatabaseLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<DatabaseLock> {
        let path = path.as_ref().to_owned();

        if path.exists() {
            // If another process holds the lock the delete is refused on
            // Windows; on Unix we detect it by failing to take the flock on
            // the existing file first.
            let existing = File::open(&path)?;
            if existing.try_lock_exclusive().is_err() {
                return Err(StoreError::AlreadyInUse(path));
            }
            drop(existing);
            if fs::remove_file(&path).is_err() {
                return Err(StoreError::AlreadyInUse(path));
            }
            warn!("removed stale lock file {}", path.display());
        }

        let lock = File::create(&path)?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::AlreadyInUse(path.clone()))?;

        Ok(DatabaseLock {
            path: Arc::new(path),
            lock: Some(lock),
        })
    }

    /// Release the lock and remove the file.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if let Some(lock) = self.lock.take() {
            let _ = fs2::FileExt::unlock(&lock);
            drop(lock);
            if self.path.exists() {
                fs::remove_file(self.path.as_path())?;
            }
        }
        Ok(())
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("could not remove lock file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_is_exclusive_within_a_process() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.lock");

        let first = DatabaseLock::acquire(&path).unwrap();
        assert!(matches!(
            DatabaseLock::acquire(&path),
            Err(StoreError::AlreadyInUse(_))
        ));
        first.release().unwrap();
        assert!(!path.exists());

        // Free again after a clean release.
        let _second = DatabaseLock::acquire(&path).unwrap();
    }

    #[test]
    fn stale_lock_file_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.lock");
        fs::write(&path, b"stale").unwrap();

        let lock = DatabaseLock::acquire(&path).unwrap();
        drop(lock);
        assert!(!path.exists());
    }
}
