//! `beakerstore cache-dir` – print the cache root.

use beakerstore_core::CacheRoot;

pub fn run_cache_dir(root: &CacheRoot) {
    println!("{}", root.base().display());
}
