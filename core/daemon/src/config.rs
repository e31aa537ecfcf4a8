//! Runtime configuration (`~/.itch-bridge/config.toml`).
//!
//! Every field is optional; a missing file means defaults.
//!
//! ```toml
//! [store]
//! butler_db_path = "/home/me/.config/itch/db/butler.db"
//!
//! [refresh]
//! ownership_interval_secs = 86400
//! installation_interval_secs = 3600
//! staleness = "sticky"   # or "prune"
//!
//! [launch]
//! uri_scheme = "itch"
//! ```

use itch_core::engine::DEFAULT_URI_SCHEME;
use itch_core::scheduler::{DEFAULT_INSTALLATION_INTERVAL_SECS, DEFAULT_OWNERSHIP_INTERVAL_SECS};
use itch_core::{EngineSettings, RefreshIntervals, StalenessPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub butler_db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    #[serde(default = "default_ownership_interval")]
    pub ownership_interval_secs: u64,
    #[serde(default = "default_installation_interval")]
    pub installation_interval_secs: u64,
    #[serde(default)]
    pub staleness: StalenessPolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            ownership_interval_secs: default_ownership_interval(),
            installation_interval_secs: default_installation_interval(),
            staleness: StalenessPolicy::default(),
        }
    }
}

fn default_ownership_interval() -> u64 {
    DEFAULT_OWNERSHIP_INTERVAL_SECS as u64
}

fn default_installation_interval() -> u64 {
    DEFAULT_INSTALLATION_INTERVAL_SECS as u64
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchConfig {
    #[serde(default = "default_uri_scheme")]
    pub uri_scheme: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            uri_scheme: default_uri_scheme(),
        }
    }
}

fn default_uri_scheme() -> String {
    DEFAULT_URI_SCHEME.to_string()
}

impl BridgeConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            intervals: RefreshIntervals {
                ownership_secs: clamp_secs(self.refresh.ownership_interval_secs),
                installation_secs: clamp_secs(self.refresh.installation_interval_secs),
            },
            staleness: self.refresh.staleness,
            uri_scheme: self.launch.uri_scheme.clone(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let scheme = &self.launch.uri_scheme;
        let valid_scheme = scheme
            .chars()
            .next()
            .map(|first| first.is_ascii_alphabetic())
            .unwrap_or(false)
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(format!("launch.uri_scheme {:?} is not a valid URI scheme", scheme));
        }
        Ok(())
    }
}

fn clamp_secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn load_runtime_config(path: &Path) -> Result<BridgeConfig, String> {
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }

    let content = fs_err::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {}", path.display(), err))?;
    let config = toml::from_str::<BridgeConfig>(&content)
        .map_err(|err| format!("Failed to parse config {}: {}", path.display(), err))?;
    config
        .validate()
        .map_err(|err| format!("Invalid config {}: {}", path.display(), err))?;
    Ok(config)
}
