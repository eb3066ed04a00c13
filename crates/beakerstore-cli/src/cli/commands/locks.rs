//! `beakerstore locks` – list (and optionally clear) lock files in the cache.

use anyhow::Result;
use beakerstore_core::cache::lock::{remove_stale_lock, scan_locks};
use beakerstore_core::{CacheRoot, CleanupRegistry, LockConfig};

pub fn run_locks(
    root: &CacheRoot,
    lock_cfg: &LockConfig,
    remove_stale: bool,
    cleanup: &CleanupRegistry,
) -> Result<()> {
    let reports = scan_locks(root, lock_cfg)?;
    if reports.is_empty() {
        println!("No locks under {}.", root.base().display());
        return Ok(());
    }

    println!("{:<8} {:<32} {}", "AGE", "HOLDER", "LOCK");
    let mut removed = 0usize;
    for r in &reports {
        let age = r
            .age
            .map(|a| format!("{}s", a.as_secs()))
            .unwrap_or_else(|| "-".to_string());
        let holder = r
            .holder
            .as_ref()
            .map(|h| h.to_string())
            .unwrap_or_else(|| "not yet recorded".to_string());
        let rel = r.path.strip_prefix(root.base()).unwrap_or(&r.path);
        match &r.stale {
            Some(reason) => println!("{:<8} {:<32} {} (stale: {})", age, holder, rel.display(), reason),
            None => println!("{:<8} {:<32} {}", age, holder, rel.display()),
        }
        if remove_stale && r.stale.is_some() && remove_stale_lock(r, lock_cfg, cleanup) {
            removed += 1;
        }
    }
    if remove_stale {
        println!("Removed {removed} stale lock(s).");
    }
    Ok(())
}
