//! Dataset registry lookup and user-path resolution.
//!
//! A user path names a dataset either by id (`ds_abc/file.txt`) or by
//! `author/name` (`lane/wordcount/file.txt`). The id form is tried first;
//! only a "not found" answer triggers the `author/name` retry.

use url::Url;

use crate::cache::{validate_dataset_id, validate_file_name, CacheEntry};
use crate::config::StoreConfig;
use crate::dataset::{DatasetMetadata, DatasetRef, Scope};
use crate::error::{BeakerstoreError, BeakerstoreResult};
use crate::http;

/// Anything that can look a dataset identifier up.
///
/// Implementations return [`BeakerstoreError::DatasetNotFound`] for an
/// unknown identifier; any other error stops resolution immediately.
pub trait Registry {
    fn lookup(&self, scope: Scope, identifier: &str) -> BeakerstoreResult<DatasetMetadata>;
}

/// Registry reached over HTTP: `GET {base}/datasets/{identifier}`.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    public: Url,
    internal: Url,
}

impl HttpRegistry {
    pub fn new(public_url: &str, internal_url: &str) -> BeakerstoreResult<Self> {
        Ok(Self {
            public: parse_base(public_url)?,
            internal: parse_base(internal_url)?,
        })
    }

    pub fn from_config(cfg: &StoreConfig) -> BeakerstoreResult<Self> {
        Self::new(cfg.registry_url(Scope::Public), cfg.registry_url(Scope::Internal))
    }

    fn base(&self, scope: Scope) -> &Url {
        match scope {
            Scope::Public => &self.public,
            Scope::Internal => &self.internal,
        }
    }

    /// Lookup URL; `/` inside the identifier stays a path separator.
    pub fn dataset_url(&self, scope: Scope, identifier: &str) -> BeakerstoreResult<Url> {
        let mut url = self.base(scope).clone();
        url.path_segments_mut()
            .map_err(|_| BeakerstoreError::Config {
                message: format!("registry URL cannot be a base: {}", self.base(scope)),
            })?
            .pop_if_empty()
            .push("datasets")
            .extend(identifier.split('/'));
        Ok(url)
    }
}

impl Registry for HttpRegistry {
    fn lookup(&self, scope: Scope, identifier: &str) -> BeakerstoreResult<DatasetMetadata> {
        let url = self.dataset_url(scope, identifier)?;
        tracing::debug!(%url, "registry lookup");
        let res = http::get(&url, None)?;
        match res.status {
            s if http::is_ok(s) => DatasetMetadata::from_json(&res.body),
            404 => Err(not_found(identifier)),
            status => Err(BeakerstoreError::Registry {
                identifier: identifier.to_string(),
                status,
            }),
        }
    }
}

fn parse_base(raw: &str) -> BeakerstoreResult<Url> {
    Url::parse(raw).map_err(|e| BeakerstoreError::Config {
        message: format!("invalid registry URL '{raw}': {e}"),
    })
}

/// The not-found error for one identifier form.
pub fn not_found(identifier: &str) -> BeakerstoreError {
    BeakerstoreError::DatasetNotFound {
        message: format!("Could not find dataset '{identifier}'."),
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: CacheEntry,
    pub metadata: DatasetMetadata,
}

/// Resolve a user path to registry metadata and the cache entry it names.
///
/// When both identifier forms are unknown, the error message lists both
/// failures, one per line.
pub fn resolve<R: Registry + ?Sized>(registry: &R, dataset: &DatasetRef) -> BeakerstoreResult<Resolved> {
    let mut misses = Vec::new();
    for identifier in dataset.identifier_candidates() {
        if !misses.is_empty() {
            tracing::debug!(path = dataset.raw(), identifier, "not found by id, trying author/name");
        }
        match resolve_as(registry, dataset, identifier) {
            Err(BeakerstoreError::DatasetNotFound { message }) => misses.push(message),
            other => return other,
        }
    }
    Err(BeakerstoreError::DatasetNotFound {
        message: misses.join("\n"),
    })
}

fn resolve_as<R: Registry + ?Sized>(
    registry: &R,
    dataset: &DatasetRef,
    identifier: &str,
) -> BeakerstoreResult<Resolved> {
    let metadata = registry.lookup(dataset.scope(), identifier)?;
    // The id becomes a directory name in the cache.
    validate_dataset_id(metadata.canonical_id())?;
    let suffix = dataset.file_suffix(identifier);
    if !suffix.is_empty() {
        validate_file_name(suffix)?;
    }
    let entry = CacheEntry::from_suffix(metadata.canonical_id(), dataset.scope(), suffix);
    Ok(Resolved { entry, metadata })
}
