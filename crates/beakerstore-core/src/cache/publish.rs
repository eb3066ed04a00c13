//! Write-then-publish: bytes go to a uniquely named file under the cache's
//! tmp directory and become visible at their final path only through one
//! atomic rename.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{CacheEntry, CacheRoot, CleanupRegistry};
use crate::error::{BeakerstoreError, BeakerstoreResult};

const TMP_PREFIX: &str = "ai2-beakerstore-";
const TMP_SUFFIX: &str = ".tmp";

/// Longest prefix we hand to the temp file builder, leaving room for its
/// random part and the suffix inside NAME_MAX (255).
const MAX_PREFIX_BYTES: usize = 200;

/// A temp file being filled. Dropping it without [`publish`](Self::publish)
/// deletes the file.
#[derive(Debug)]
pub struct PendingFile {
    file: Option<NamedTempFile>,
    path: PathBuf,
    cleanup: CleanupRegistry,
    written: u64,
}

impl PendingFile {
    /// Temp file for `entry` under the root's tmp directory.
    pub fn for_entry(
        root: &CacheRoot,
        entry: &CacheEntry,
        cleanup: &CleanupRegistry,
    ) -> BeakerstoreResult<Self> {
        Self::create_in(&root.tmp_dir()?, &tmp_prefix(&entry.cache_key()), cleanup)
    }

    /// Temp file in `dir` whose name starts with `prefix`.
    pub fn create_in(dir: &Path, prefix: &str, cleanup: &CleanupRegistry) -> BeakerstoreResult<Self> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(TMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| BeakerstoreError::io("failed to create temp file", dir, e))?;
        let path = file.path().to_path_buf();
        cleanup.register(&path);
        tracing::debug!(path = %path.display(), "created temp file");
        Ok(Self {
            file: Some(file),
            path,
            cleanup: cleanup.clone(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append one chunk.
    pub fn write_chunk(&mut self, data: &[u8]) -> BeakerstoreResult<()> {
        let file = self.file.as_mut().ok_or_else(|| BeakerstoreError::io(
            "temp file already published",
            &self.path,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ))?;
        file.write_all(data)
            .map_err(|e| BeakerstoreError::io("failed to write temp file", &self.path, e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush and atomically rename onto `final_path`. Returns bytes written.
    pub fn publish(mut self, final_path: &Path) -> BeakerstoreResult<u64> {
        let Some(mut file) = self.file.take() else {
            return Err(BeakerstoreError::io(
                "temp file already published",
                &self.path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        };
        file.flush()
            .map_err(|e| BeakerstoreError::io("failed to flush temp file", &self.path, e))?;
        let persisted = file.persist(final_path);
        self.cleanup.unregister(&self.path);
        persisted.map_err(|e| {
            BeakerstoreError::io("failed to publish temp file", final_path, e.error)
        })?;
        tracing::debug!(
            from = %self.path.display(),
            to = %final_path.display(),
            bytes = self.written,
            "published"
        );
        Ok(self.written)
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            // NamedTempFile removed the file when it was dropped just now.
            self.cleanup.unregister(&self.path);
            tracing::debug!(path = %self.path.display(), "discarded unpublished temp file");
        }
    }
}

/// Flat temp-file prefix for a cache key: path separators become `%`.
pub(crate) fn tmp_prefix(cache_key: &str) -> String {
    let flat = cache_key.replace('/', "%");
    let mut prefix = format!("{TMP_PREFIX}{flat}");
    if prefix.len() > MAX_PREFIX_BYTES {
        let mut take = MAX_PREFIX_BYTES;
        while take > 0 && !prefix.is_char_boundary(take) {
            take -= 1;
        }
        prefix.truncate(take);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Scope;

    fn setup() -> (tempfile::TempDir, CacheRoot, CleanupRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let root = CacheRoot::at(dir.path()).unwrap();
        (dir, root, CleanupRegistry::new())
    }

    #[test]
    fn prefix_is_flat() {
        assert_eq!(
            tmp_prefix("public/ds_1/sub/a.txt"),
            "ai2-beakerstore-public%ds_1%sub%a.txt"
        );
        let long = format!("public/ds_1/{}", "é".repeat(200));
        let p = tmp_prefix(&long);
        assert!(p.len() <= MAX_PREFIX_BYTES);
        assert!(p.starts_with("ai2-beakerstore-public%ds_1%"));
    }

    #[test]
    fn write_then_publish() {
        let (_dir, root, cleanup) = setup();
        let entry = CacheEntry::file("ds_1", Scope::Public, "a.txt");
        let final_path = root.entry_path(&entry);
        std::fs::create_dir_all(final_path.parent().unwrap()).unwrap();

        let mut pending = PendingFile::for_entry(&root, &entry, &cleanup).unwrap();
        let tmp_path = pending.path().to_path_buf();
        assert!(tmp_path.starts_with(root.base().join("tmp")));
        let name = tmp_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("ai2-beakerstore-public%ds_1%a.txt"));
        assert!(name.ends_with(".tmp"));
        assert!(cleanup.contains(&tmp_path));

        pending.write_chunk(b"hello ").unwrap();
        pending.write_chunk(b"world").unwrap();
        assert!(!final_path.exists(), "nothing visible before publish");

        assert_eq!(pending.publish(&final_path).unwrap(), 11);
        assert_eq!(std::fs::read(&final_path).unwrap(), b"hello world");
        assert!(!tmp_path.exists());
        assert!(cleanup.is_empty());
    }

    #[test]
    fn interrupted_write_never_reaches_final_path() {
        let (_dir, root, cleanup) = setup();
        let entry = CacheEntry::file("ds_1", Scope::Public, "big.bin");
        let final_path = root.entry_path(&entry);

        let mut pending = PendingFile::for_entry(&root, &entry, &cleanup).unwrap();
        let tmp_path = pending.path().to_path_buf();
        pending.write_chunk(&[7u8; 4096]).unwrap();
        drop(pending);

        assert!(!final_path.exists());
        assert!(!tmp_path.exists());
        assert!(cleanup.is_empty());
    }

    #[test]
    fn abandoned_temp_file_is_removed_by_flush() {
        let (_dir, root, cleanup) = setup();
        let entry = CacheEntry::file("ds_1", Scope::Public, "c.txt");
        let mut pending = PendingFile::for_entry(&root, &entry, &cleanup).unwrap();
        pending.write_chunk(b"partial").unwrap();
        let tmp_path = pending.path().to_path_buf();

        // Simulates an exit path that skips destructors.
        std::mem::forget(pending);
        assert!(tmp_path.exists());

        assert_eq!(cleanup.flush_all(), 1);
        assert!(!tmp_path.exists());
        assert!(!root.entry_path(&entry).exists());
    }
}
