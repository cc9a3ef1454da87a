use crate::index::RefreshSettings;
use crate::server::ShardSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "textsearch";
const CONFIG_FILE: &str = "config.json";

pub const ENV_INDEX_ADDR: &str = "TEXTSEARCH_INDEX_ADDR";
pub const ENV_SEARCHERS: &str = "TEXTSEARCH_SEARCHERS";
pub const ENV_REPOS_ROOT: &str = "TEXTSEARCH_REPOS_ROOT";

/// Configuration stored in the app data directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address of the index engine's shard server. Indexed search is
    /// disabled without one.
    #[serde(default)]
    pub index_addr: Option<String>,

    /// Addresses of the JIT searcher shards
    #[serde(default)]
    pub searcher_endpoints: Vec<String>,

    /// Directory holding one git checkout per repository name
    #[serde(default = "default_repos_root")]
    pub repos_root: PathBuf,

    #[serde(default = "default_list_refresh_secs")]
    pub list_refresh_secs: u64,

    #[serde(default = "default_list_refresh_jitter_secs")]
    pub list_refresh_jitter_secs: u64,

    /// Consecutive list failures before the failure is served to callers
    #[serde(default = "default_list_failure_threshold")]
    pub list_failure_threshold: usize,

    #[serde(default = "default_background_refresh")]
    pub background_refresh: bool,

    /// Bound on the list call made while splitting repositories
    #[serde(default = "default_split_list_timeout_ms")]
    pub split_list_timeout_ms: u64,

    #[serde(default = "default_jit_concurrency_per_endpoint")]
    pub jit_concurrency_per_endpoint: usize,

    #[serde(default = "default_rpc_grace_ms")]
    pub rpc_grace_ms: u64,

    #[serde(default = "default_rpc_io_timeout_secs")]
    pub rpc_io_timeout_secs: u64,

    /// LRU size for commit-pinned results on a shard server
    #[serde(default = "default_result_cache_size")]
    pub result_cache_size: usize,
}

fn default_repos_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_NAME).join("repos"))
        .unwrap_or_else(|| PathBuf::from("repos"))
}

fn default_list_refresh_secs() -> u64 {
    5
}

fn default_list_refresh_jitter_secs() -> u64 {
    1
}

fn default_list_failure_threshold() -> usize {
    3
}

fn default_background_refresh() -> bool {
    true
}

fn default_split_list_timeout_ms() -> u64 {
    1000
}

fn default_jit_concurrency_per_endpoint() -> usize {
    5
}

fn default_rpc_grace_ms() -> u64 {
    1000
}

fn default_rpc_io_timeout_secs() -> u64 {
    30
}

fn default_result_cache_size() -> usize {
    128
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_addr: None,
            searcher_endpoints: Vec::new(),
            repos_root: default_repos_root(),
            list_refresh_secs: default_list_refresh_secs(),
            list_refresh_jitter_secs: default_list_refresh_jitter_secs(),
            list_failure_threshold: default_list_failure_threshold(),
            background_refresh: default_background_refresh(),
            split_list_timeout_ms: default_split_list_timeout_ms(),
            jit_concurrency_per_endpoint: default_jit_concurrency_per_endpoint(),
            rpc_grace_ms: default_rpc_grace_ms(),
            rpc_io_timeout_secs: default_rpc_io_timeout_secs(),
            result_cache_size: default_result_cache_size(),
        }
    }
}

impl Config {
    /// Load config from the app data directory (or default if not found),
    /// then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from `path`, or return default if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save config to the app data directory
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Override fields from environment variables looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var(ENV_INDEX_ADDR) {
            let addr = addr.trim();
            self.index_addr = (!addr.is_empty()).then(|| addr.to_string());
        }
        if let Some(searchers) = var(ENV_SEARCHERS) {
            self.searcher_endpoints = searchers.split_whitespace().map(String::from).collect();
        }
        if let Some(root) = var(ENV_REPOS_ROOT)
            && !root.trim().is_empty()
        {
            self.repos_root = PathBuf::from(root.trim());
        }
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            period: Duration::from_secs(self.list_refresh_secs),
            jitter: Duration::from_secs(self.list_refresh_jitter_secs),
            failure_threshold: self.list_failure_threshold.max(1),
            background: self.background_refresh,
        }
    }

    pub fn shard_settings(&self) -> ShardSettings {
        ShardSettings {
            grace: Duration::from_millis(self.rpc_grace_ms),
            cache_size: self.result_cache_size,
        }
    }

    pub fn split_list_timeout(&self) -> Duration {
        Duration::from_millis(self.split_list_timeout_ms)
    }

    pub fn rpc_io_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_io_timeout_secs)
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory, creating it if needed
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);
    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}
