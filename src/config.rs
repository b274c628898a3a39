// Configuration save/restore functionality

use crate::enrichment::DEFAULT_MAX_CONCURRENT_LOOKUPS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "glownet";
const CONFIG_FILE: &str = "config.json";

/// Column the connection table is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Pid,
    Name,
    Host,
}

impl SortKey {
    /// Next key in the `s` cycle
    pub fn next(self) -> Self {
        match self {
            SortKey::Pid => SortKey::Name,
            SortKey::Name => SortKey::Host,
            SortKey::Host => SortKey::Pid,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::Pid => "PID",
            SortKey::Name => "Process",
            SortKey::Host => "Remote Host",
        }
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the proc filesystem to scan
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Refresh period in milliseconds
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// MaxMind country database (.mmdb); None disables country lookup
    #[serde(default)]
    pub geoip_database: Option<PathBuf>,

    /// Upper bound on reverse DNS lookups in flight
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,

    /// Resolve remote addresses to hostnames
    #[serde(default = "default_resolve_hostnames")]
    pub resolve_hostnames: bool,

    /// Initial table ordering
    #[serde(default)]
    pub default_sort: SortKey,
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_max_concurrent_lookups() -> usize {
    DEFAULT_MAX_CONCURRENT_LOOKUPS
}

fn default_resolve_hostnames() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proc_root: default_proc_root(),
            refresh_interval_ms: default_refresh_interval_ms(),
            geoip_database: None,
            max_concurrent_lookups: default_max_concurrent_lookups(),
            resolve_hostnames: default_resolve_hostnames(),
            default_sort: SortKey::default(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine config directory")?;
        Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load configuration from a file, using defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .context(format!("Failed to create config directory: {:?}", dir))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents).context(format!("Failed to write config file: {:?}", path))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
