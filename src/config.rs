use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::db::Location;
use crate::proxy::{CacheVersion, PartitionStore, WorkerOptions};
use crate::store::ClientStore;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub media: MediaConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Root of the records API, e.g. "https://api.example.com/v1"
  pub base_url: String,
  #[serde(default = "default_collection")]
  pub collection: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaConfig {
  /// Hosts serving generated media (case-insensitive). Subdomains match too.
  #[serde(default, deserialize_with = "deserialize_lowercase")]
  pub hosts: Vec<String>,
}

fn deserialize_lowercase<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.trim().to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// When false every read misses and nothing is written
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Database file (default: <data dir>/duocache/store.db)
  pub path: Option<PathBuf>,
}

impl StoreConfig {
  /// Default lifetime of a store entry. Must be positive and fit a
  /// millisecond timestamp.
  pub fn ttl(&self) -> Result<chrono::Duration> {
    i64::try_from(self.ttl_secs)
      .ok()
      .filter(|secs| *secs > 0)
      .and_then(chrono::Duration::try_seconds)
      .ok_or_else(|| {
        eyre!(
          "Invalid store.ttl_secs {}: must be between 1 and {}",
          self.ttl_secs,
          i64::MAX / 1000
        )
      })
  }
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: default_ttl_secs(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
  /// Bump to roll out a new proxy version and drop old partitions
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// Assets pre-cached on install
  #[serde(default)]
  pub bootstrap: Vec<String>,
  #[serde(default = "default_update_poll_secs")]
  pub update_poll_secs: u64,
  /// Database file (default: <data dir>/duocache/proxy.db)
  pub path: Option<PathBuf>,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      version: default_version(),
      cache_prefix: default_cache_prefix(),
      bootstrap: Vec::new(),
      update_poll_secs: default_update_poll_secs(),
      path: None,
    }
  }
}

fn default_collection() -> String {
  "records".to_string()
}

fn default_true() -> bool {
  true
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_cache_prefix() -> String {
  "duocache".to_string()
}

fn default_update_poll_secs() -> u64 {
  3600
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./duocache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/duocache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/duocache/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("duocache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("duocache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and validate YAML configuration.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.api_base()?;
    config.store.ttl()?;
    Ok(config)
  }

  /// Get the API token from the environment.
  ///
  /// Checks DUOCACHE_API_TOKEN. The API may be open, so a missing token is
  /// not an error.
  pub fn get_api_token() -> Option<String> {
    std::env::var("DUOCACHE_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// Directory holding the databases and the log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("duocache"))
  }

  pub fn api_base(&self) -> Result<Url> {
    Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", self.api.base_url, e))
  }

  pub fn client_store(&self) -> Result<ClientStore> {
    if !self.store.enabled {
      return Ok(ClientStore::disabled());
    }

    let path = match &self.store.path {
      Some(p) => p.clone(),
      None => Self::data_dir()?.join("store.db"),
    };
    Ok(
      ClientStore::open(Location::File(path))
        .with_default_ttl(self.store.ttl()?),
    )
  }

  pub fn partition_store(&self) -> Result<PartitionStore> {
    let path = match &self.proxy.path {
      Some(p) => p.clone(),
      None => Self::data_dir()?.join("proxy.db"),
    };
    Ok(PartitionStore::open(Location::File(path)))
  }

  /// Options for the proxy version described by this config. Relative
  /// bootstrap entries resolve against the API base.
  pub fn worker_options(&self) -> Result<WorkerOptions> {
    let api_base = self.api_base()?;
    let bootstrap = self
      .proxy
      .bootstrap
      .iter()
      .map(|asset| {
        api_base
          .join(asset)
          .map_err(|e| eyre!("Invalid bootstrap asset {:?}: {}", asset, e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(WorkerOptions {
      version: CacheVersion::new(self.proxy.version.clone()),
      cache_prefix: self.proxy.cache_prefix.clone(),
      media_hosts: self.media.hosts.clone(),
      api_base,
      bootstrap,
    })
  }

  pub fn update_poll_interval(&self) -> Duration {
    Duration::from_secs(self.proxy.update_poll_secs.max(1))
  }
}
