//! Paths to delete if the process stops before finishing its own cleanup.
//!
//! Temp files and lock files are registered when created and unregistered
//! once renamed away or released. The entry point owns the registry and
//! flushes it at shutdown (see [`CleanupRegistry::flush_on_drop`]).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared set of absolute paths pending cleanup. Cloning shares the set.
#[derive(Debug, Clone, Default)]
pub struct CleanupRegistry {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn paths(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember `path` for deletion at flush time.
    pub fn register(&self, path: &Path) {
        let path = absolute(path);
        tracing::trace!(path = %path.display(), "registered for cleanup");
        self.paths().insert(path);
    }

    /// Forget `path` (it was finalized deliberately).
    pub fn unregister(&self, path: &Path) {
        self.paths().remove(&absolute(path));
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths().contains(&absolute(path))
    }

    pub fn len(&self) -> usize {
        self.paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }

    /// Delete every registered path and clear the set. Returns how many were removed.
    /// Paths that are already gone are skipped; other failures are logged.
    pub fn flush_all(&self) -> usize {
        let pending: Vec<PathBuf> = self.paths().drain().collect();
        let mut removed = 0;
        for path in pending {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "cleaned up");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), "could not clean up: {}", e),
            }
        }
        removed
    }

    /// Guard that flushes the registry when dropped, including during unwinding.
    pub fn flush_on_drop(&self) -> FlushGuard {
        FlushGuard {
            registry: self.clone(),
        }
    }
}

/// Flushes a [`CleanupRegistry`] when dropped.
#[must_use = "the registry is flushed when the guard is dropped"]
pub struct FlushGuard {
    registry: CleanupRegistry,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let removed = self.registry.flush_all();
        if removed > 0 {
            tracing::info!(removed, "removed leftover temp and lock files");
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
