//! Download orchestration: make a cache entry exist on disk.

use std::path::PathBuf;

use rand::seq::SliceRandom;

use crate::cache::{ensure_dir, validate_file_name, CacheEntry, CacheRoot, CleanupRegistry, PendingFile};
use crate::config::{LockConfig, StoreConfig};
use crate::dataset::DatasetMetadata;
use crate::error::{BeakerstoreError, BeakerstoreResult};
use crate::store::{self, FetchOutcome, Manifest};

/// Materializes entries under one cache root.
#[derive(Debug, Clone)]
pub struct Fetcher {
    root: CacheRoot,
    cleanup: CleanupRegistry,
    lock_config: LockConfig,
    chunk_size: usize,
}

impl Fetcher {
    pub fn new(root: &CacheRoot, cleanup: &CleanupRegistry, config: &StoreConfig) -> Self {
        Self {
            root: root.clone(),
            cleanup: cleanup.clone(),
            lock_config: config.lock,
            chunk_size: config.chunk_size.max(1024),
        }
    }

    pub fn root(&self) -> &CacheRoot {
        &self.root
    }

    /// Ensure `entry` exists locally, downloading it if absent, and return its path.
    ///
    /// Already-present entries return without any network call or lock.
    pub fn materialize(
        &self,
        entry: &CacheEntry,
        metadata: &DatasetMetadata,
    ) -> BeakerstoreResult<PathBuf> {
        let path = self.root.entry_path(entry);
        if entry.exists(&self.root) {
            tracing::debug!(entry = %entry.display_name(), "already in cache");
            return Ok(path);
        }
        if entry.is_dir() {
            self.materialize_directory(entry, metadata)?;
        } else {
            self.materialize_file(entry, metadata)?;
        }
        Ok(path)
    }

    /// Fetch the manifest and materialize every listed file, in random order
    /// so concurrent processes on the same dataset tend to work on different
    /// files. The directory itself is never locked.
    fn materialize_directory(
        &self,
        entry: &CacheEntry,
        metadata: &DatasetMetadata,
    ) -> BeakerstoreResult<()> {
        let manifest = store::fetch_manifest(metadata)?;
        let mut files = manifest
            .paths()
            .map(|p| {
                validate_file_name(p)?;
                Ok(entry.derive_file(p))
            })
            .collect::<BeakerstoreResult<Vec<_>>>()?;
        tracing::info!(
            dataset = entry.dataset_id(),
            files = files.len(),
            "downloading dataset directory"
        );

        files.shuffle(&mut rand::thread_rng());
        for file in &files {
            self.materialize_file(file, metadata)?;
        }

        self.mark_complete(entry, &manifest)
    }

    fn materialize_file(
        &self,
        entry: &CacheEntry,
        metadata: &DatasetMetadata,
    ) -> BeakerstoreResult<FetchOutcome> {
        if entry.exists(&self.root) {
            return Ok(FetchOutcome::AlreadyPresent);
        }
        tracing::info!(
            file = entry.file_name().unwrap_or_default(),
            dataset = entry.dataset_id(),
            "downloading"
        );
        let outcome = store::fetch_file(
            &self.root,
            entry,
            metadata,
            self.lock_config,
            &self.cleanup,
            self.chunk_size,
        )?;
        if let FetchOutcome::Downloaded { bytes } = outcome {
            tracing::debug!(entry = %entry.display_name(), bytes, "download complete");
        }
        Ok(outcome)
    }

    /// Publish the directory's completion marker (the manifest it was built from).
    fn mark_complete(&self, entry: &CacheEntry, manifest: &Manifest) -> BeakerstoreResult<()> {
        // An empty manifest still yields an (empty) dataset directory.
        ensure_dir(&self.root.entry_path(entry))?;

        let body = serde_json::to_vec_pretty(manifest).map_err(|e| BeakerstoreError::InvalidResponse {
            message: format!("could not encode manifest: {e}"),
        })?;
        let marker = entry.completion_marker(&self.root);
        let mut pending = PendingFile::create_in(
            &self.root.tmp_dir()?,
            &format!("ai2-beakerstore-{}%{}.complete", entry.scope(), entry.dataset_id()),
            &self.cleanup,
        )?;
        pending.write_chunk(&body)?;
        pending.publish(&marker)?;
        tracing::debug!(dataset = entry.dataset_id(), "directory complete");
        Ok(())
    }
}
