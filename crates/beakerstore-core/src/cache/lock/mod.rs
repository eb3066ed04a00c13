//! Cross-process advisory lock for one cache entry.
//!
//! The lock is a sentinel file next to the entry (`{entry}.lock`); its
//! presence on disk is the lock state. Whoever creates it exclusively holds
//! it, and releasing deletes it. Waiters poll the filesystem.
//!
//! States map onto types: a [`CacheLock`] is unheld (or waiting inside
//! [`CacheLock::acquire`]), a [`HeldLock`] is held, and consuming the
//! `HeldLock` releases it. Releasing a lock you do not hold cannot be written.

mod holder;
mod scan;

pub use holder::{LockContent, LockHolder, StaleReason};
pub use scan::{remove_stale_lock, scan_locks, LockReport};

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use super::{CacheEntry, CacheRoot, CleanupRegistry};
use crate::config::LockConfig;
use crate::error::{BeakerstoreError, BeakerstoreResult};
use holder::{file_age, stale_reason};

/// Lock file suffix appended to the entry path.
pub const LOCK_SUFFIX: &str = ".lock";

/// Suffix of the guard file a waiter holds while breaking a stale lock.
const BREAK_SUFFIX: &str = ".break";

/// How long a lock path may hold something other than a holder record
/// before waiters give up on it. Also the age at which a break guard is
/// considered abandoned.
const SETTLE: Duration = Duration::from_secs(2);

/// `{entry_path}.lock`.
pub fn lock_path_for(entry_path: &Path) -> PathBuf {
    with_suffix(entry_path, LOCK_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut o = path.as_os_str().to_owned();
    o.push(suffix);
    PathBuf::from(o)
}

/// Unheld lock for one cache entry.
#[derive(Debug, Clone)]
pub struct CacheLock {
    lock_path: PathBuf,
    display_name: String,
    config: LockConfig,
    cleanup: CleanupRegistry,
}

impl CacheLock {
    pub fn new(
        lock_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
        config: LockConfig,
        cleanup: &CleanupRegistry,
    ) -> Self {
        Self {
            lock_path: lock_path.into(),
            display_name: display_name.into(),
            config,
            cleanup: cleanup.clone(),
        }
    }

    /// Lock scoped to `entry` under `root`.
    pub fn for_entry(
        root: &CacheRoot,
        entry: &CacheEntry,
        config: LockConfig,
        cleanup: &CleanupRegistry,
    ) -> Self {
        Self::new(
            lock_path_for(&root.entry_path(entry)),
            entry.display_name(),
            config,
            cleanup,
        )
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn is_locked(&self) -> bool {
        self.lock_path.is_file()
    }

    /// Block until this process holds the lock. No timeout while a live
    /// holder keeps it.
    ///
    /// Losing the create race to another process just means waiting again.
    /// Fails if the lock path is occupied by something that is not a lock.
    pub fn acquire(self) -> BeakerstoreResult<HeldLock> {
        loop {
            self.wait_until_free()?;
            if let Some(held) = self.try_acquire()? {
                return Ok(held);
            }
            tracing::debug!(lock = %self.display_name, "lost the race for the lock, waiting again");
        }
    }

    /// One exclusive-create attempt. `Ok(None)` if the lock file already exists.
    ///
    /// The holder record is part of taking the lock: if it cannot be written
    /// the file is removed again and the error returned.
    pub fn try_acquire(&self) -> BeakerstoreResult<Option<HeldLock>> {
        let mut options = File::options();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = match options.open(&self.lock_path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(BeakerstoreError::io(
                    "failed to create lock file",
                    &self.lock_path,
                    e,
                ))
            }
        };
        self.cleanup.register(&self.lock_path);

        let holder = LockHolder::current();
        let written = serde_json::to_vec(&holder)
            .map_err(std::io::Error::from)
            .and_then(|bytes| file.write_all(&bytes));
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&self.lock_path);
            self.cleanup.unregister(&self.lock_path);
            return Err(BeakerstoreError::io(
                "failed to record lock holder",
                &self.lock_path,
                e,
            ));
        }
        tracing::debug!(lock = %self.display_name, path = %self.lock_path.display(), "acquired lock");

        Ok(Some(HeldLock {
            lock_path: self.lock_path.clone(),
            display_name: self.display_name.clone(),
            cleanup: self.cleanup.clone(),
            holder,
            heartbeat_every: self.config.heartbeat_interval(),
            last_heartbeat: Instant::now(),
            released: false,
        }))
    }

    /// Poll until the lock file is gone, reporting progress periodically.
    fn wait_until_free(&self) -> BeakerstoreResult<()> {
        if !self.is_locked() {
            return Ok(());
        }
        let start = Instant::now();
        let mut last_report = start;
        let mut unrecognized_since: Option<Instant> = None;
        tracing::info!(lock = %self.display_name, "waiting for the lock");

        loop {
            let content = LockContent::read(&self.lock_path);
            match &content {
                LockContent::Missing => return Ok(()),
                LockContent::Holder(_) => {
                    unrecognized_since = None;
                    if self.break_if_stale(&content) {
                        return Ok(());
                    }
                }
                LockContent::Empty | LockContent::Foreign => {
                    let since = *unrecognized_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= SETTLE {
                        return Err(BeakerstoreError::InvalidPath {
                            path: self.lock_path.display().to_string(),
                            reason: "occupied by a file that is not a lock".to_string(),
                        });
                    }
                }
            }
            if last_report.elapsed() >= self.config.report_interval() {
                tracing::info!(
                    lock = %self.display_name,
                    waited_secs = start.elapsed().as_secs(),
                    "still waiting for the lock"
                );
                last_report = Instant::now();
            }
            std::thread::sleep(self.config.poll_interval());
        }
    }

    /// Remove the lock if `seen` is a stale holder record and the lock file
    /// still holds exactly that record. Returns true if the lock is gone.
    ///
    /// Breakers take turns through `{lock}.break`, and re-read the lock under
    /// it, so a fresh lock created after `seen` was read is never removed.
    fn break_if_stale(&self, seen: &LockContent) -> bool {
        let Some(holder) = seen.holder() else {
            return false;
        };
        if stale_reason(holder, file_age(&self.lock_path), &self.config).is_none() {
            return false;
        }
        let Some(_guard) = BreakGuard::take(&self.lock_path, &self.cleanup) else {
            return false;
        };

        let current = LockContent::read(&self.lock_path);
        if current == LockContent::Missing {
            return true;
        }
        if &current != seen {
            tracing::debug!(lock = %self.display_name, "lock changed hands before it could be broken");
            return false;
        }
        // A heartbeat may have landed since the first look.
        let Some(reason) = stale_reason(holder, file_age(&self.lock_path), &self.config) else {
            return false;
        };
        tracing::warn!(lock = %self.display_name, holder = %holder, %reason, "breaking stale lock");
        match fs::remove_file(&self.lock_path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(lock = %self.display_name, "could not remove stale lock: {}", e);
                false
            }
        }
    }
}

/// Exclusive right to break one lock. Removed on drop.
struct BreakGuard {
    path: PathBuf,
    cleanup: CleanupRegistry,
}

impl BreakGuard {
    /// `None` if another waiter is breaking the same lock right now.
    fn take(lock_path: &Path, cleanup: &CleanupRegistry) -> Option<Self> {
        let path = with_suffix(lock_path, BREAK_SUFFIX);
        match File::options().write(true).create_new(true).open(&path) {
            Ok(_) => {
                cleanup.register(&path);
                Some(Self {
                    path,
                    cleanup: cleanup.clone(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Left behind by a breaker that died mid-break.
                if file_age(&path).is_some_and(|age| age >= SETTLE) {
                    tracing::warn!(path = %path.display(), "removing abandoned break guard");
                    let _ = fs::remove_file(&path);
                }
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "could not create break guard: {}", e);
                None
            }
        }
    }
}

impl Drop for BreakGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "could not remove break guard: {}", e);
            }
        }
        self.cleanup.unregister(&self.path);
    }
}

/// A lock this process holds. Dropping it releases on a best-effort basis;
/// [`HeldLock::release`] reports failures.
#[derive(Debug)]
pub struct HeldLock {
    lock_path: PathBuf,
    display_name: String,
    cleanup: CleanupRegistry,
    holder: LockHolder,
    heartbeat_every: Duration,
    last_heartbeat: Instant,
    released: bool,
}

impl HeldLock {
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Refresh the lock file's modification time so waiters with an age
    /// limit keep seeing it as live. Cheap to call per chunk; throttled.
    pub fn heartbeat(&mut self) {
        if self.last_heartbeat.elapsed() < self.heartbeat_every {
            return;
        }
        self.last_heartbeat = Instant::now();
        let touched = File::options()
            .write(true)
            .open(&self.lock_path)
            .and_then(|f| f.set_modified(SystemTime::now()));
        if let Err(e) = touched {
            tracing::warn!(lock = %self.display_name, "lock heartbeat failed: {}", e);
        }
    }

    /// Delete the lock file.
    pub fn release(mut self) -> BeakerstoreResult<()> {
        self.released = true;
        self.remove()
    }

    fn remove(&self) -> BeakerstoreResult<()> {
        self.cleanup.unregister(&self.lock_path);
        match LockContent::read(&self.lock_path) {
            LockContent::Holder(current) if current == self.holder => {}
            LockContent::Missing => {
                tracing::warn!(lock = %self.display_name, "lock file vanished before release");
                return Ok(());
            }
            other => {
                tracing::warn!(
                    lock = %self.display_name,
                    holder = ?other.holder(),
                    "lock was broken and taken over; leaving it in place"
                );
                return Ok(());
            }
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => {
                tracing::debug!(lock = %self.display_name, "released lock");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(lock = %self.display_name, "lock file vanished before release");
                Ok(())
            }
            Err(e) => Err(BeakerstoreError::io(
                "failed to remove lock file",
                &self.lock_path,
                e,
            )),
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.remove() {
                tracing::warn!(lock = %self.display_name, "{}", e);
            }
        }
    }
}
