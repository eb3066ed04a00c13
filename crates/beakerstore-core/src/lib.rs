//! Local store for Beaker datasets.
//!
//! Resolves a dataset path (`ds_abc`, `ds_abc/file.txt`, `author/name/file.txt`)
//! against the registry, then materializes the dataset or file into an
//! on-disk cache shared safely by concurrent processes.

pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod fetch;
mod http;
pub mod logging;
pub mod registry;
pub mod store;

use std::path::PathBuf;

pub use cache::{CacheEntry, CacheRoot, CleanupRegistry, EntryKind};
pub use config::{LockConfig, StoreConfig};
pub use dataset::{DatasetMetadata, DatasetRef, Scope};
pub use error::{BeakerstoreError, BeakerstoreResult};
pub use fetch::Fetcher;
pub use registry::{HttpRegistry, Registry, Resolved};

/// Resolver plus fetcher over one cache root.
pub struct Beakerstore<R = HttpRegistry> {
    registry: R,
    fetcher: Fetcher,
}

impl Beakerstore<HttpRegistry> {
    /// Store backed by the HTTP registry from `config`.
    ///
    /// `cache` overrides the cache root; otherwise it is resolved from the
    /// environment, `config.cache_dir` and the platform default.
    pub fn new(
        config: &StoreConfig,
        cache: Option<CacheRoot>,
        cleanup: &CleanupRegistry,
    ) -> BeakerstoreResult<Self> {
        let registry = HttpRegistry::from_config(config)?;
        Self::with_registry(registry, config, cache, cleanup)
    }
}

impl<R: Registry> Beakerstore<R> {
    pub fn with_registry(
        registry: R,
        config: &StoreConfig,
        cache: Option<CacheRoot>,
        cleanup: &CleanupRegistry,
    ) -> BeakerstoreResult<Self> {
        let root = match cache {
            Some(root) => root,
            None => CacheRoot::resolve(config.cache_dir.as_deref())?,
        };
        Ok(Self {
            registry,
            fetcher: Fetcher::new(&root, cleanup, config),
        })
    }

    pub fn cache_root(&self) -> &CacheRoot {
        self.fetcher.root()
    }

    /// Resolve without downloading.
    pub fn resolve(&self, user_path: &str, scope: Scope) -> BeakerstoreResult<Resolved> {
        let dataset = DatasetRef::new(user_path, scope)?;
        registry::resolve(&self.registry, &dataset)
    }

    /// Resolve `user_path` and materialize it; returns the local directory or file path.
    pub fn resolve_to_local_path(&self, user_path: &str, scope: Scope) -> BeakerstoreResult<PathBuf> {
        let resolved = self.resolve(user_path, scope)?;
        self.fetcher.materialize(&resolved.entry, &resolved.metadata)
    }
}

/// One-shot [`Beakerstore::resolve_to_local_path`] with default configuration.
pub fn resolve_to_local_path(
    user_path: &str,
    scope: Scope,
    cache_override: Option<CacheRoot>,
    cleanup: &CleanupRegistry,
) -> BeakerstoreResult<PathBuf> {
    Beakerstore::new(&StoreConfig::default(), cache_override, cleanup)?
        .resolve_to_local_path(user_path, scope)
}
