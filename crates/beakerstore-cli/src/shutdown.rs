//! SIGINT/SIGTERM handling: flush the cleanup registry, then exit.
//!
//! Handlers are registered before the command runs and watched from their
//! own thread on a current-thread runtime.

use std::future::Future;
use std::io;

use beakerstore_core::CleanupRegistry;

/// 128 + SIGINT, as shells report an interrupted command.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

pub fn install(cleanup: &CleanupRegistry) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let signalled = {
        let _context = runtime.enter();
        shutdown_signal()?
    };
    let cleanup = cleanup.clone();
    std::thread::Builder::new()
        .name("beakerstore-signals".to_string())
        .spawn(move || {
            runtime.block_on(signalled);
            std::process::exit(interrupted(&cleanup));
        })?;
    Ok(())
}

/// Registers the handlers now; the future resolves on the first signal.
#[cfg(unix)]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = terminate.recv() => {}
            _ = interrupt.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}

/// Remove everything the interrupted run registered. Returns the exit status.
fn interrupted(cleanup: &CleanupRegistry) -> i32 {
    let removed = cleanup.flush_all();
    tracing::warn!(removed, "interrupted; removed unfinished temp and lock files");
    eprintln!("beakerstore: interrupted");
    INTERRUPTED_EXIT_CODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interruption_flushes_registered_files() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("ai2-beakerstore-public%ds_1%a.txt.tmp");
        let lock = dir.path().join("a.txt.lock");
        std::fs::write(&partial, b"half").unwrap();
        std::fs::write(&lock, b"").unwrap();
        let cleanup = CleanupRegistry::new();
        cleanup.register(&partial);
        cleanup.register(&lock);

        assert_eq!(interrupted(&cleanup), INTERRUPTED_EXIT_CODE);
        assert!(!partial.exists());
        assert!(!lock.exists());
        assert!(cleanup.is_empty());
    }
}
