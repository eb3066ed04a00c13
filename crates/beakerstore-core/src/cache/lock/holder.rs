//! Identity written into a lock file by the process that holds it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::LockConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub host: String,
    pub pid: u32,
    /// Seconds since the Unix epoch.
    pub acquired_at: u64,
    /// Random per acquisition, so two holders in one process never compare equal.
    #[serde(default)]
    pub token: u64,
}

impl LockHolder {
    pub fn current() -> Self {
        let acquired_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            host: current_host(),
            pid: std::process::id(),
            acquired_at,
            token: rand::random(),
        }
    }

    /// Holder recorded in `lock_path`, if it holds a holder record.
    pub fn read(lock_path: &Path) -> Option<Self> {
        match LockContent::read(lock_path) {
            LockContent::Holder(h) => Some(h),
            _ => None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.host == current_host()
    }

    /// Known dead: same host and no such process.
    pub fn is_dead(&self) -> bool {
        self.is_local() && !process_alive(self.pid)
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} on {}", self.pid, self.host)
    }
}

/// What sits at a lock path.
///
/// Only [`LockContent::Holder`] is a lock this crate can judge. A name ending
/// in `.lock` alone proves nothing: datasets publish files like `poetry.lock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockContent {
    Missing,
    /// Just created; the holder record follows immediately.
    Empty,
    Holder(LockHolder),
    /// Anything else, including unreadable paths.
    Foreign,
}

impl LockContent {
    pub fn read(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) if bytes.is_empty() => LockContent::Empty,
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(holder) => LockContent::Holder(holder),
                Err(_) => LockContent::Foreign,
            },
            Err(e) if e.kind() == ErrorKind::NotFound => LockContent::Missing,
            Err(_) => LockContent::Foreign,
        }
    }

    pub fn holder(&self) -> Option<&LockHolder> {
        match self {
            LockContent::Holder(h) => Some(h),
            _ => None,
        }
    }
}

/// Why a lock may be broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    DeadHolder { pid: u32 },
    Expired { age: Duration },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::DeadHolder { pid } => write!(f, "holder pid {pid} is not running"),
            StaleReason::Expired { age } => write!(f, "untouched for {}s", age.as_secs()),
        }
    }
}

/// Decide whether a lock held by `holder` whose file is `age` old is abandoned.
///
/// Age only counts when `stale_after_secs` is configured.
pub(crate) fn stale_reason(
    holder: &LockHolder,
    age: Option<Duration>,
    config: &LockConfig,
) -> Option<StaleReason> {
    if holder.is_dead() {
        return Some(StaleReason::DeadHolder { pid: holder.pid });
    }
    match (config.stale_after(), age) {
        (Some(limit), Some(age)) if age > limit => Some(StaleReason::Expired { age }),
        _ => None,
    }
}

/// Time since `path` was last modified.
pub(crate) fn file_age(path: &Path) -> Option<Duration> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
}

fn current_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        // 0 and negatives address process groups; never treat those as dead.
        return true;
    }
    // Signal 0 only checks existence and permission.
    let r = unsafe { libc::kill(pid, 0) };
    if r == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
