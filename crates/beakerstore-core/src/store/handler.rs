//! Easy2 handler that streams one dataset file into the cache.
//!
//! The response status is checked when the first body chunk arrives (or when
//! an empty body completes). Only then is the parent directory prepared, the
//! entry lock taken and existence re-checked; the body then streams in
//! bounded chunks into a temp file that is renamed into place at the end.

use curl::easy::{Easy2, Handler, WriteError};

use crate::cache::lock::{CacheLock, HeldLock};
use crate::cache::{ensure_dir, CacheEntry, CacheRoot, CleanupRegistry, PendingFile};
use crate::config::LockConfig;
use crate::dataset::DatasetMetadata;
use crate::error::{BeakerstoreError, BeakerstoreResult};
use crate::http::{self, parse_http_status, record_header};

/// What a file fetch ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// This process wrote and published the file.
    Downloaded { bytes: u64 },
    /// Another process published it first; nothing was written.
    AlreadyPresent,
}

enum Phase {
    /// No body seen yet.
    Pending,
    Writing { file: PendingFile, lock: HeldLock },
    Skipped,
    Rejected(u32),
    Failed(BeakerstoreError),
}

/// Per-transfer state for one file entry.
pub struct FileHandler {
    root: CacheRoot,
    entry: CacheEntry,
    lock_config: LockConfig,
    cleanup: CleanupRegistry,
    headers: Vec<String>,
    phase: Phase,
}

impl FileHandler {
    pub fn new(
        root: &CacheRoot,
        entry: &CacheEntry,
        lock_config: LockConfig,
        cleanup: &CleanupRegistry,
    ) -> Self {
        assert!(!entry.is_dir(), "expected a file cache entry, got a directory entry");
        Self {
            root: root.clone(),
            entry: entry.clone(),
            lock_config,
            cleanup: cleanup.clone(),
            headers: Vec::new(),
            phase: Phase::Pending,
        }
    }

    /// Parent dir, lock, re-check, temp file.
    fn start(&self) -> BeakerstoreResult<Phase> {
        let final_path = self.root.entry_path(&self.entry);
        if let Some(parent) = final_path.parent() {
            ensure_dir(parent)?;
        }

        let lock = CacheLock::for_entry(&self.root, &self.entry, self.lock_config, &self.cleanup)
            .acquire()?;

        if self.entry.exists(&self.root) {
            tracing::debug!(
                entry = %self.entry.display_name(),
                "published by another process while waiting for the lock"
            );
            lock.release()?;
            return Ok(Phase::Skipped);
        }

        let file = PendingFile::for_entry(&self.root, &self.entry, &self.cleanup)?;
        Ok(Phase::Writing { file, lock })
    }

    fn start_or_fail(&self) -> Phase {
        self.start().unwrap_or_else(Phase::Failed)
    }

    /// Settle the transfer: publish, or turn what happened into an error.
    /// `transfer` is the result of `perform`, `status` the final response code.
    pub fn finish(
        &mut self,
        transfer: Result<(), curl::Error>,
        status: u32,
    ) -> BeakerstoreResult<FetchOutcome> {
        let mut phase = std::mem::replace(&mut self.phase, Phase::Skipped);
        let empty_body = matches!(phase, Phase::Pending) && transfer.is_ok();
        if empty_body {
            // The write callback never ran.
            if !http::is_ok(status) {
                return Err(self.rejected(status));
            }
            phase = self.start_or_fail();
        }

        match (phase, transfer) {
            (Phase::Failed(e), _) => Err(e),
            (Phase::Rejected(status), _) => Err(self.rejected(status)),
            (Phase::Skipped, _) => Ok(FetchOutcome::AlreadyPresent),
            (_, Err(e)) => Err(BeakerstoreError::Http(e)),
            (Phase::Writing { file, lock }, Ok(())) => {
                let bytes = file.publish(&self.root.entry_path(&self.entry))?;
                lock.release()?;
                Ok(FetchOutcome::Downloaded { bytes })
            }
            (Phase::Pending, Ok(())) => Err(BeakerstoreError::InvalidResponse {
                message: "transfer finished without a response".to_string(),
            }),
        }
    }

    fn rejected(&self, status: u32) -> BeakerstoreError {
        tracing::debug!(entry = %self.entry.display_name(), status, "file request rejected");
        BeakerstoreError::Store { what: "file", status }
    }
}

impl Handler for FileHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        record_header(&mut self.headers, data);
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if let Phase::Pending = self.phase {
            self.phase = match parse_http_status(&self.headers) {
                Some(status) if http::is_ok(status) => self.start_or_fail(),
                Some(status) => Phase::Rejected(status),
                None => Phase::Failed(BeakerstoreError::InvalidResponse {
                    message: "body arrived without a status line".to_string(),
                }),
            };
        }

        let written = match &mut self.phase {
            Phase::Writing { file, lock } => file.write_chunk(data).map(|()| lock.heartbeat()),
            // Returning less than `data.len()` aborts the transfer.
            _ => return Ok(0),
        };
        match written {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                // Dropping the Writing phase discards the temp file and releases the lock.
                self.phase = Phase::Failed(e);
                Ok(0)
            }
        }
    }
}

/// Download one file entry into the cache.
pub(crate) fn fetch_file(
    root: &CacheRoot,
    entry: &CacheEntry,
    metadata: &DatasetMetadata,
    lock_config: LockConfig,
    cleanup: &CleanupRegistry,
    chunk_size: usize,
) -> BeakerstoreResult<FetchOutcome> {
    let Some(file_name) = entry.file_name() else {
        panic!("expected a file cache entry, got directory '{}'", entry.dataset_id());
    };
    let url = super::file_url(metadata, file_name)?;

    let mut easy = Easy2::new(FileHandler::new(root, entry, lock_config, cleanup));
    easy.url(url.as_str())?;
    easy.follow_location(true)?;
    easy.useragent(&http::user_agent())?;
    easy.buffer_size(chunk_size)?;
    easy.http_headers(http::auth_headers(Some(metadata.storage_token()))?)?;

    let transfer = easy.perform();
    let status = easy.response_code().unwrap_or(0);
    easy.get_mut().finish(transfer, status)
}
