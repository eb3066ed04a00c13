use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::dataset::Scope;

/// Lock polling parameters (optional `[lock]` section in config.toml).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How often a waiting process re-checks the lock file, in milliseconds.
    pub poll_interval_ms: u64,
    /// Emit a "still waiting" message after this many seconds of waiting.
    pub report_interval_secs: u64,
    /// Treat a lock whose file has not been touched for this long as abandoned.
    /// None = only break locks whose holder is a dead process on this host.
    pub stale_after_secs: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            report_interval_secs: 60,
            stale_after_secs: None,
        }
    }
}

impl LockConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }

    /// Holders refresh their lock file at least this often so age-based
    /// staleness never fires on a live download.
    pub fn heartbeat_interval(&self) -> Duration {
        let every = Duration::from_secs(self.report_interval_secs.max(2) / 2);
        match self.stale_after() {
            Some(stale) => every.min(stale / 2),
            None => every,
        }
    }
}

/// Global configuration loaded from `~/.config/beakerstore/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Registry API base for public datasets.
    pub public_url: String,
    /// Registry API base for internal datasets.
    pub internal_url: String,
    /// Cache root. `AI2_DATASTORE_DIR` and `--cache-dir` take precedence.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Read/write buffer size for file downloads in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub lock: LockConfig,
}

fn default_chunk_size() -> usize {
    256 * 1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            public_url: "https://beaker.org/api/v3".to_string(),
            internal_url: "https://allenai.beaker.org/api/v3".to_string(),
            cache_dir: None,
            chunk_size: default_chunk_size(),
            lock: LockConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn registry_url(&self, scope: Scope) -> &str {
        match scope {
            Scope::Public => &self.public_url,
            Scope::Internal => &self.internal_url,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("beakerstore")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<StoreConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = StoreConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: StoreConfig = toml::from_str(&data)?;
    Ok(cfg)
}
