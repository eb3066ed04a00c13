use beakerstore_core::{logging, CleanupRegistry};

mod cli;
mod shutdown;

use crate::cli::CliCommand;

fn main() {
    if let Err(err) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("log file unavailable, logging to stderr: {err:#}");
    }

    // Temp files and locks abandoned by a failed or interrupted run are
    // removed before exit.
    let cleanup = CleanupRegistry::new();
    if let Err(err) = shutdown::install(&cleanup) {
        tracing::warn!("signal handling unavailable: {err}");
    }
    let result = {
        let _flush = cleanup.flush_on_drop();
        CliCommand::run_from_args(&cleanup)
    };

    if let Err(err) = result {
        eprintln!("beakerstore error: {:#}", err);
        std::process::exit(1);
    }
}
