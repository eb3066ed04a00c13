//! CLI for the beakerstore dataset cache.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use beakerstore_core::{config, CacheRoot, CleanupRegistry, StoreConfig};
use clap::{Parser, Subcommand};

use commands::{run_cache_dir, run_completions, run_locks, run_path};

/// Top-level CLI for beakerstore.
#[derive(Debug, Parser)]
#[command(name = "beakerstore")]
#[command(about = "Fetch Beaker datasets into a local cache", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a dataset or dataset file if needed and print its local path.
    Path {
        /// `ds_id`, `ds_id/file`, `author/name` or `author/name/file`.
        path: String,
        /// Look the dataset up in the internal registry.
        #[arg(long)]
        internal: bool,
        /// Cache root (overrides AI2_DATASTORE_DIR and the config file).
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },

    /// Print the cache root in use.
    CacheDir {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },

    /// List lock files in the cache and who holds them.
    Locks {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
        /// Delete locks whose holder is gone or that have expired.
        #[arg(long)]
        remove_stale: bool,
    },

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

impl CliCommand {
    pub fn run_from_args(cleanup: &CleanupRegistry) -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Path {
                path,
                internal,
                cache_dir,
            } => {
                let cfg = load_config()?;
                let root = cache_root(&cfg, cache_dir)?;
                run_path(&cfg, root, cleanup, &path, internal)?;
            }
            CliCommand::CacheDir { cache_dir } => {
                let cfg = load_config()?;
                run_cache_dir(&cache_root(&cfg, cache_dir)?);
            }
            CliCommand::Locks {
                cache_dir,
                remove_stale,
            } => {
                let cfg = load_config()?;
                run_locks(&cache_root(&cfg, cache_dir)?, &cfg.lock, remove_stale, cleanup)?;
            }
            CliCommand::Completions { shell } => run_completions(shell),
        }

        Ok(())
    }
}

fn load_config() -> Result<StoreConfig> {
    let cfg = config::load_or_init()?;
    tracing::debug!("loaded config: {:?}", cfg);
    Ok(cfg)
}

/// `--cache-dir` wins over everything `CacheRoot::resolve` looks at.
fn cache_root(cfg: &StoreConfig, flag: Option<PathBuf>) -> Result<CacheRoot> {
    let root = match flag {
        Some(dir) => CacheRoot::at(dir)?,
        None => CacheRoot::resolve(cfg.cache_dir.as_deref())?,
    };
    Ok(root)
}

#[cfg(test)]
mod tests;
