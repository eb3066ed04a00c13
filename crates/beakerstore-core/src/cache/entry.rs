//! Cache entries: a whole dataset directory, or one file inside a dataset.

use std::path::{Component, Path, PathBuf};

use super::CacheRoot;
use crate::dataset::Scope;
use crate::error::{BeakerstoreError, BeakerstoreResult};

/// Suffix of the sibling marker written once a directory entry is fully populated.
pub(crate) const COMPLETE_SUFFIX: &str = ".complete";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File(String),
}

/// A dataset (or a file within it) addressed by logical name.
///
/// Built fresh for every resolution and never mutated; file entries for a
/// directory come from [`CacheEntry::derive_file`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheEntry {
    dataset_id: String,
    scope: Scope,
    kind: EntryKind,
}

impl CacheEntry {
    pub fn directory(dataset_id: impl Into<String>, scope: Scope) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            scope,
            kind: EntryKind::Directory,
        }
    }

    /// Panics if `file_name` is empty.
    pub fn file(dataset_id: impl Into<String>, scope: Scope, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        assert!(!file_name.is_empty(), "file entries need a non-empty file name");
        Self {
            dataset_id: dataset_id.into(),
            scope,
            kind: EntryKind::File(file_name),
        }
    }

    /// Directory entry for an empty suffix, file entry otherwise.
    pub fn from_suffix(dataset_id: impl Into<String>, scope: Scope, suffix: &str) -> Self {
        if suffix.is_empty() {
            Self::directory(dataset_id, scope)
        } else {
            Self::file(dataset_id, scope, suffix)
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    pub fn file_name(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Directory => None,
            EntryKind::File(name) => Some(name),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Relative path under the cache root: `scope/dataset_id[/file_name]`.
    pub fn cache_key(&self) -> String {
        match &self.kind {
            EntryKind::Directory => format!("{}/{}", self.scope, self.dataset_id),
            EntryKind::File(name) => format!("{}/{}/{}", self.scope, self.dataset_id, name),
        }
    }

    /// Human-facing name used in log lines: `dataset_id[/file_name]`.
    pub fn display_name(&self) -> String {
        match &self.kind {
            EntryKind::Directory => self.dataset_id.clone(),
            EntryKind::File(name) => format!("{}/{}", self.dataset_id, name),
        }
    }

    /// Whether the entry is already materialized under `root`.
    ///
    /// Files must be regular files. Directories additionally need their
    /// completion marker, so a half-populated directory does not count.
    pub fn exists(&self, root: &CacheRoot) -> bool {
        let path = root.entry_path(self);
        match &self.kind {
            EntryKind::Directory => path.is_dir() && self.completion_marker(root).is_file(),
            EntryKind::File(_) => path.is_file(),
        }
    }

    /// Location of the directory-completion marker (`{dataset_id}.complete`
    /// next to the dataset directory). Meaningful for directory entries only.
    pub fn completion_marker(&self, root: &CacheRoot) -> PathBuf {
        root.base()
            .join(self.scope.as_str())
            .join(format!("{}{COMPLETE_SUFFIX}", self.dataset_id))
    }

    /// File entry for `file_name` within this directory entry.
    ///
    /// Calling this on a file entry is a programming error and panics.
    pub fn derive_file(&self, file_name: impl Into<String>) -> CacheEntry {
        match &self.kind {
            EntryKind::Directory => CacheEntry::file(self.dataset_id.clone(), self.scope, file_name),
            EntryKind::File(name) => panic!(
                "expected a directory cache entry, got file entry '{}/{}'",
                self.dataset_id, name
            ),
        }
    }
}

/// Reject file names that would escape the dataset directory or that cannot
/// be stored as a relative path (`..`, absolute paths, empty segments).
pub fn validate_file_name(name: &str) -> BeakerstoreResult<()> {
    let invalid = |reason: &str| BeakerstoreError::InvalidPath {
        path: name.to_string(),
        reason: reason.to_string(),
    };
    if name.split('/').any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }
    // `components()` silently drops interior `.` segments.
    if name.split('/').any(|s| s == "." || s == "..") {
        return Err(invalid("relative segments are not allowed"));
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir | Component::ParentDir => {
                return Err(invalid("relative segments are not allowed"))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be a relative path"))
            }
        }
    }
    Ok(())
}

/// Reject dataset ids that cannot be used as one directory name.
pub fn validate_dataset_id(id: &str) -> BeakerstoreResult<()> {
    let reason = if id.is_empty() {
        "empty dataset id"
    } else if id.contains('/') || id.contains('\\') {
        "dataset id contains a path separator"
    } else if id == "." || id == ".." {
        "dataset id is a relative path segment"
    } else {
        return Ok(());
    };
    Err(BeakerstoreError::InvalidPath {
        path: id.to_string(),
        reason: reason.to_string(),
    })
}
