//! Find lock files left under a cache root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::holder::{file_age, stale_reason, LockContent, LockHolder, StaleReason};
use super::{CacheLock, LOCK_SUFFIX};
use crate::cache::{CacheRoot, CleanupRegistry, TMP_DIR_NAME};
use crate::config::LockConfig;
use crate::error::{BeakerstoreError, BeakerstoreResult};

/// One lock file found on disk.
#[derive(Debug, Clone)]
pub struct LockReport {
    pub path: PathBuf,
    /// None while the creator has not written its record yet.
    pub holder: Option<LockHolder>,
    /// Time since the file was last modified.
    pub age: Option<Duration>,
    /// Set when the lock would be broken by a waiter using `config`.
    pub stale: Option<StaleReason>,
}

/// All locks under `root` (the tmp directory is skipped), sorted by path.
///
/// A `.lock` file counts only if it is empty or holds a holder record;
/// dataset files that merely share the suffix are left out.
pub fn scan_locks(root: &CacheRoot, config: &LockConfig) -> BeakerstoreResult<Vec<LockReport>> {
    let mut found: Vec<PathBuf> = Vec::new();
    let entries = match fs::read_dir(root.base()) {
        Ok(e) => e,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BeakerstoreError::io("failed to read cache root", root.base(), e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| BeakerstoreError::io("failed to read cache root", root.base(), e))?;
        if entry.file_name() == TMP_DIR_NAME {
            continue;
        }
        collect(&entry.path(), &mut found)?;
    }
    found.sort();

    Ok(found
        .into_iter()
        .filter_map(|path| {
            let holder = match LockContent::read(&path) {
                LockContent::Holder(h) => Some(h),
                LockContent::Empty => None,
                LockContent::Missing | LockContent::Foreign => return None,
            };
            let age = file_age(&path);
            let stale = holder.as_ref().and_then(|h| stale_reason(h, age, config));
            Some(LockReport {
                path,
                holder,
                age,
                stale,
            })
        })
        .collect())
}

fn collect(path: &Path, found: &mut Vec<PathBuf>) -> BeakerstoreResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(BeakerstoreError::io("failed to stat", path, e)),
    };
    if meta.is_dir() {
        let entries = fs::read_dir(path).map_err(|e| BeakerstoreError::io("failed to read directory", path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BeakerstoreError::io("failed to read directory", path, e))?;
            collect(&entry.path(), found)?;
        }
    } else if meta.is_file() && path.to_string_lossy().ends_with(LOCK_SUFFIX) {
        found.push(path.to_path_buf());
    }
    Ok(())
}

/// Break the lock in `report` the way a waiter would: only if it still holds
/// the reported holder record and that holder is still stale under `config`.
/// Returns true if the lock is gone.
pub fn remove_stale_lock(report: &LockReport, config: &LockConfig, cleanup: &CleanupRegistry) -> bool {
    let Some(holder) = &report.holder else {
        return false;
    };
    let lock = CacheLock::new(&report.path, report.path.display().to_string(), *config, cleanup);
    let removed = lock.break_if_stale(&LockContent::Holder(holder.clone()));
    if removed {
        tracing::info!(path = %report.path.display(), "removed stale lock");
    }
    removed
}
