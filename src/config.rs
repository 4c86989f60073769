use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub gateway: GatewayConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
  /// Serving origin; requests to any other origin pass through untouched
  pub url: String,
  /// Application scope: paths under this prefix are app-shell requests
  #[serde(default = "default_scope")]
  pub scope: String,
  /// Reserved data-API prefix: paths under it are live-data requests
  #[serde(default = "default_data_prefix")]
  pub data_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Shared prefix of all cache names
  pub prefix: String,
  /// Version suffix embedded in cache names; bump on deploy to invalidate
  /// the previous version's caches at next activation
  pub version: String,
  /// Paths fetched and stored verbatim at install time
  pub manifest: Vec<String>,
  /// Reserved offline fallback page, checked before synthesizing HTML
  pub offline_page: Option<String>,
}

fn default_scope() -> String {
  "/web/".to_string()
}

fn default_data_prefix() -> String {
  "/data/".to_string()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "awning".to_string(),
      version: "v1".to_string(),
      manifest: Vec::new(),
      offline_page: None,
    }
  }
}

impl CacheConfig {
  /// Name of the cache pre-populated at install time.
  pub fn static_cache_name(&self) -> String {
    format!("{}-static-{}", self.prefix, self.version)
  }

  /// Name of the cache filled as responses are captured.
  pub fn dynamic_cache_name(&self) -> String {
    format!("{}-dynamic-{}", self.prefix, self.version)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./awning.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/awning/config.yaml
  /// 4. ~/.config/awning/config.yaml
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
        "No configuration file found. Create one at ~/.config/awning/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("awning.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("awning").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_names_embed_version() {
    let cache = CacheConfig {
      prefix: "console".to_string(),
      version: "v3".to_string(),
      ..CacheConfig::default()
    };

    assert_eq!(cache.static_cache_name(), "console-static-v3");
    assert_eq!(cache.dynamic_cache_name(), "console-dynamic-v3");
  }

  #[test]
  fn test_minimal_config_parses_with_defaults() {
    let config: Config = serde_yaml::from_str("gateway:\n  url: \"https://app.example.com\"\n").unwrap();

    assert_eq!(config.gateway.scope, "/web/");
    assert_eq!(config.gateway.data_prefix, "/data/");
    assert_eq!(config.cache.static_cache_name(), "awning-static-v1");
    assert!(config.cache.manifest.is_empty());
  }
}
