//! Run lock
//!
//! At most one gateway run may be active system-wide. The lock is an
//! advisory exclusive file lock; a run that cannot take it exits
//! immediately without side effects. The lock releases on drop (and on
//! process death, since the OS drops advisory locks with the descriptor).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info};

use crate::error::Result;

/// Held for the lifetime of a run
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock; `Ok(None)` means another run is active
    pub fn acquire(path: &Path) -> Result<Option<RunLock>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(_) => {
                info!("another run holds {}", path.display());
                return Ok(None);
            }
        }

        let mut file = file;
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!("run lock acquired at {}", path.display());
        Ok(Some(RunLock {
            file,
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
        debug!("run lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let first = RunLock::acquire(&path).unwrap();
        assert!(first.is_some());
        let second = RunLock::acquire(&path).unwrap();
        assert!(second.is_none());

        drop(first);
        let third = RunLock::acquire(&path).unwrap();
        assert!(third.is_some());
    }
}
