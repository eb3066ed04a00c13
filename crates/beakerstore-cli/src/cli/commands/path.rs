//! `beakerstore path` – resolve, download if needed, print the local path.

use anyhow::{Context, Result};
use beakerstore_core::{Beakerstore, CacheRoot, CleanupRegistry, Scope, StoreConfig};

pub fn run_path(
    cfg: &StoreConfig,
    root: CacheRoot,
    cleanup: &CleanupRegistry,
    path: &str,
    internal: bool,
) -> Result<()> {
    let scope = if internal { Scope::Internal } else { Scope::Public };
    let store = Beakerstore::new(cfg, Some(root), cleanup)?;
    let local = store
        .resolve_to_local_path(path, scope)
        .with_context(|| format!("fetching {scope} dataset path '{path}'"))?;
    println!("{}", local.display());
    Ok(())
}
