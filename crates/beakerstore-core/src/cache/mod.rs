//! On-disk cache layout.
//!
//! Everything lives under one base directory:
//!
//! ```text
//! {base}/tmp/                          in-progress downloads
//! {base}/{scope}/{dataset_id}/...      dataset files
//! {base}/{scope}/{dataset_id}.complete finished-directory marker
//! {base}/{scope}/{dataset_id}/{file}.lock
//! ```
//!
//! The only mutation discipline is create-if-absent, never overwrite a
//! published file, publish via atomic rename.

mod cleanup;
mod entry;
pub mod lock;
mod publish;

pub use cleanup::{CleanupRegistry, FlushGuard};
pub use entry::{validate_dataset_id, validate_file_name, CacheEntry, EntryKind};
pub use publish::PendingFile;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BeakerstoreError, BeakerstoreResult};

/// Environment variable overriding the cache base directory.
pub const CACHE_DIR_ENV: &str = "AI2_DATASTORE_DIR";

/// Name of the scratch directory for in-progress writes.
pub const TMP_DIR_NAME: &str = "tmp";

/// Resolved cache base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoot {
    base: PathBuf,
}

impl CacheRoot {
    /// Use `base` as the cache root, creating it if needed.
    pub fn at(base: impl Into<PathBuf>) -> BeakerstoreResult<Self> {
        let base = base.into();
        ensure_dir(&base)?;
        tracing::info!(path = %base.display(), "cache at custom path");
        Ok(Self { base })
    }

    /// Resolve the base from `AI2_DATASTORE_DIR`, then `configured`, then the
    /// platform default; creates it if absent.
    pub fn resolve(configured: Option<&Path>) -> BeakerstoreResult<Self> {
        let from_env = std::env::var_os(CACHE_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let base = match choose_base(from_env, configured.map(Path::to_path_buf)) {
            Some(base) => base,
            None => platform_default()?,
        };
        ensure_dir(&base)?;
        tracing::debug!(path = %base.display(), "resolved cache root");
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Scratch directory for in-progress writes, created on first use.
    pub fn tmp_dir(&self) -> BeakerstoreResult<PathBuf> {
        let tmp = self.base.join(TMP_DIR_NAME);
        ensure_dir(&tmp)?;
        Ok(tmp)
    }

    /// Absolute location of an entry.
    pub fn entry_path(&self, entry: &CacheEntry) -> PathBuf {
        self.base.join(entry.cache_key())
    }
}

/// `create_dir_all` treats an existing directory as success, so concurrent
/// callers racing on the same path all succeed.
pub(crate) fn ensure_dir(path: &Path) -> BeakerstoreResult<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)
        .map_err(|e| BeakerstoreError::io("failed to create directory", path, e))
}

/// Environment beats config; None means fall through to the platform default.
fn choose_base(from_env: Option<PathBuf>, configured: Option<PathBuf>) -> Option<PathBuf> {
    from_env.or(configured)
}

fn platform_default() -> BeakerstoreResult<PathBuf> {
    let os = std::env::consts::OS;
    if !matches!(os, "linux" | "macos") {
        return Err(BeakerstoreError::UnsupportedPlatform { os: os.to_string() });
    }
    let home = dirs::home_dir().ok_or_else(|| BeakerstoreError::Config {
        message: format!("no home directory; set {CACHE_DIR_ENV} to choose a cache location"),
    })?;
    default_for(os, &home).ok_or_else(|| BeakerstoreError::UnsupportedPlatform { os: os.to_string() })
}

/// Default cache location per OS family.
fn default_for(os: &str, home: &Path) -> Option<PathBuf> {
    match os {
        "macos" => Some(home.join("Library").join("Caches").join("beakerstore")),
        "linux" => Some(home.join(".ai2").join("beakerstore")),
        _ => None,
    }
}
