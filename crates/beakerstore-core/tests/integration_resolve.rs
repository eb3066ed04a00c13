//! Integration tests: resolve and download against a local registry/storage server.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use beakerstore_core::config::{LockConfig, StoreConfig};
use beakerstore_core::{Beakerstore, BeakerstoreError, CacheEntry, CacheRoot, CleanupRegistry, Scope};
use common::beaker_server::BeakerServer;
use tempfile::tempdir;

fn config_for(server: &BeakerServer) -> StoreConfig {
    StoreConfig {
        public_url: server.registry_url(),
        internal_url: server.registry_url(),
        chunk_size: 16 * 1024,
        lock: LockConfig {
            poll_interval_ms: 10,
            ..LockConfig::default()
        },
        ..StoreConfig::default()
    }
}

fn store(server: &BeakerServer, cache: &Path) -> Beakerstore {
    Beakerstore::new(
        &config_for(server),
        Some(CacheRoot::at(cache).unwrap()),
        &CleanupRegistry::new(),
    )
    .unwrap()
}

/// Every path under `dir` ending in `.lock`.
fn lock_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for e in std::fs::read_dir(&d).unwrap().flatten() {
            let p = e.path();
            if p.is_dir() {
                stack.push(p);
            } else if p.extension().is_some_and(|x| x == "lock") {
                found.push(p);
            }
        }
    }
    found
}

fn tmp_is_empty(cache: &Path) -> bool {
    match std::fs::read_dir(cache.join("tmp")) {
        Ok(mut it) => it.next().is_none(),
        Err(_) => true,
    }
}

#[test]
fn file_by_id_is_downloaded_into_cache() {
    let server = BeakerServer::start();
    server.add_dataset("ds_1", None, &[("words.txt", b"hello world")]);
    let cache = tempdir().unwrap();

    let path = store(&server, cache.path())
        .resolve_to_local_path("ds_1/words.txt", Scope::Public)
        .unwrap();

    assert_eq!(path, cache.path().join("public/ds_1/words.txt"));
    assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    assert_eq!(server.hits("/storage/datasets/st_ds_1/files/words.txt"), 1);
    assert!(tmp_is_empty(cache.path()));
    assert!(lock_files(cache.path()).is_empty());
}

#[test]
fn author_and_name_fallback_uses_canonical_id() {
    let server = BeakerServer::start();
    server.add_dataset("ds_wc", Some("lane/wordcount"), &[("sub/a.txt", b"aaa")]);
    let cache = tempdir().unwrap();

    let path = store(&server, cache.path())
        .resolve_to_local_path("lane/wordcount/sub/a.txt", Scope::Public)
        .unwrap();

    assert_eq!(path, cache.path().join("public/ds_wc/sub/a.txt"));
    assert_eq!(std::fs::read(&path).unwrap(), b"aaa");
    assert_eq!(server.hits("/api/v3/datasets/lane"), 1);
    assert_eq!(server.hits("/api/v3/datasets/lane/wordcount"), 1);
}

#[test]
fn directory_is_expanded_and_marked_complete() {
    let server = BeakerServer::start();
    server.add_dataset(
        "ds_dir",
        None,
        &[("a.txt", b"first"), ("sub/b.txt", b"second"), ("empty", b"")],
    );
    let cache = tempdir().unwrap();

    let path = store(&server, cache.path())
        .resolve_to_local_path("ds_dir", Scope::Public)
        .unwrap();

    assert_eq!(path, cache.path().join("public/ds_dir"));
    assert_eq!(std::fs::read(path.join("a.txt")).unwrap(), b"first");
    assert_eq!(std::fs::read(path.join("sub/b.txt")).unwrap(), b"second");
    assert_eq!(std::fs::read(path.join("empty")).unwrap(), b"");
    assert!(cache.path().join("public/ds_dir.complete").is_file());

    let root = CacheRoot::at(cache.path()).unwrap();
    assert!(CacheEntry::directory("ds_dir", Scope::Public).exists(&root));
    assert!(tmp_is_empty(cache.path()));
    assert!(lock_files(cache.path()).is_empty());
}

#[test]
fn second_call_does_no_storage_io() {
    let server = BeakerServer::start();
    server.add_dataset("ds_1", None, &[("a.txt", b"x"), ("b.txt", b"y")]);
    let cache = tempdir().unwrap();
    let bs = store(&server, cache.path());

    let first_file = bs.resolve_to_local_path("ds_1/a.txt", Scope::Public).unwrap();
    let first_dir = bs.resolve_to_local_path("ds_1", Scope::Public).unwrap();
    let storage = server.storage_hits();
    // a.txt was already cached, so the directory only fetched b.txt
    assert_eq!(server.hits("/storage/datasets/st_ds_1/files/a.txt"), 1);

    assert_eq!(bs.resolve_to_local_path("ds_1/a.txt", Scope::Public).unwrap(), first_file);
    assert_eq!(bs.resolve_to_local_path("ds_1", Scope::Public).unwrap(), first_dir);
    assert_eq!(server.storage_hits(), storage);
}

#[test]
fn unknown_dataset_lists_every_attempt() {
    let server = BeakerServer::start();
    let cache = tempdir().unwrap();

    let err = store(&server, cache.path())
        .resolve_to_local_path("chloea/nonexistent", Scope::Public)
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(
        err.to_string(),
        "Could not find dataset 'chloea'.\nCould not find dataset 'chloea/nonexistent'."
    );
    assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 0);
}

#[test]
fn missing_file_is_store_error_and_leaves_nothing() {
    let server = BeakerServer::start();
    server.add_dataset("ds_1", None, &[("a.txt", b"x")]);
    let cache = tempdir().unwrap();

    let err = store(&server, cache.path())
        .resolve_to_local_path("ds_1/missing.txt", Scope::Public)
        .unwrap_err();

    assert!(matches!(err, BeakerstoreError::Store { what: "file", status: 404 }));
    assert!(!cache.path().join("public/ds_1/missing.txt").exists());
    assert!(tmp_is_empty(cache.path()));
    assert!(lock_files(cache.path()).is_empty());
}

#[test]
fn manifest_failure_is_store_error() {
    let server = BeakerServer::start();
    server.add_dataset("ds_1", None, &[("a.txt", b"x")]);
    server.fail("/storage/datasets/st_ds_1/manifest", 503);
    let cache = tempdir().unwrap();

    let err = store(&server, cache.path())
        .resolve_to_local_path("ds_1", Scope::Public)
        .unwrap_err();

    assert!(matches!(
        err,
        BeakerstoreError::Store { what: "directory manifest", status: 503 }
    ));
    assert!(!cache.path().join("public/ds_1.complete").exists());
}

#[test]
fn registry_failure_stops_resolution() {
    let server = BeakerServer::start();
    server.add_dataset("ds_x", Some("author/name"), &[("a.txt", b"x")]);
    server.fail("/api/v3/datasets/author", 500);
    let cache = tempdir().unwrap();

    let err = store(&server, cache.path())
        .resolve_to_local_path("author/name", Scope::Public)
        .unwrap_err();

    assert!(matches!(err, BeakerstoreError::Registry { status: 500, .. }));
    assert_eq!(server.hits("/api/v3/datasets/author/name"), 0);
}

#[test]
fn internal_scope_uses_internal_registry_and_subtree() {
    let server = BeakerServer::start();
    server.add_dataset("ds_1", None, &[("a.txt", b"internal")]);
    let cache = tempdir().unwrap();
    let cfg = StoreConfig {
        // nothing listens on port 1
        public_url: "http://127.0.0.1:1/api/v3".to_string(),
        ..config_for(&server)
    };
    let bs = Beakerstore::new(&cfg, Some(CacheRoot::at(cache.path()).unwrap()), &CleanupRegistry::new())
        .unwrap();

    let path = bs.resolve_to_local_path("ds_1/a.txt", Scope::Internal).unwrap();
    assert_eq!(path, cache.path().join("internal/ds_1/a.txt"));
    assert!(bs.resolve_to_local_path("ds_1/a.txt", Scope::Public).is_err());
}

#[test]
fn concurrent_fetches_of_one_file_agree() {
    let server = BeakerServer::start();
    let body: Vec<u8> = (0u8..251).cycle().take(512 * 1024).collect();
    server.add_dataset("ds_big", None, &[("big.bin", &body)]);
    let cache = tempdir().unwrap();
    let bs = Arc::new(store(&server, cache.path()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let bs = Arc::clone(&bs);
            thread::spawn(move || bs.resolve_to_local_path("ds_big/big.bin", Scope::Public))
        })
        .collect();
    let paths: Vec<PathBuf> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    let expected = cache.path().join("public/ds_big/big.bin");
    assert!(paths.iter().all(|p| p == &expected));
    assert_eq!(std::fs::read(&expected).unwrap(), body);
    assert!(tmp_is_empty(cache.path()));
    assert!(lock_files(cache.path()).is_empty());
}
