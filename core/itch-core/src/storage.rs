//! Storage configuration and path management for the itch bridge.
//!
//! `StorageConfig` centralises every path the bridge reads or writes:
//!
//! - the bridge's own root (`~/.itch-bridge`): socket, persistent cache,
//!   config and logs
//! - the itch client's butler database (read-only)
//!
//! Tests use `StorageConfig::with_root()` to point everything at a temp dir.

use std::path::{Path, PathBuf};

const BRIDGE_DIR: &str = ".itch-bridge";
const BUTLER_DB_RELATIVE_PATH: &str = "itch/db/butler.db";

/// Central configuration for all bridge storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for bridge data (default: ~/.itch-bridge)
    root: PathBuf,
    /// Location of the itch client's butler.db
    butler_db: PathBuf,
}

impl StorageConfig {
    /// Resolves the default layout from the user's home and config dirs.
    pub fn from_home() -> Result<Self, String> {
        let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
        let butler_db = default_butler_db_path().unwrap_or_else(|| {
            home.join(".config").join(BUTLER_DB_RELATIVE_PATH)
        });
        Ok(Self {
            root: home.join(BRIDGE_DIR),
            butler_db,
        })
    }

    /// Creates a StorageConfig with a custom root directory.
    /// The butler database is expected at `<root>/butler.db`.
    pub fn with_root(root: PathBuf) -> Self {
        let butler_db = root.join("butler.db");
        Self { root, butler_db }
    }

    /// Overrides the butler database location.
    pub fn with_butler_db(mut self, path: PathBuf) -> Self {
        self.butler_db = path;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn butler_db(&self) -> &Path {
        &self.butler_db
    }

    /// Path to the daemon's Unix socket.
    pub fn socket_file(&self) -> PathBuf {
        self.root.join("bridge.sock")
    }

    /// Path to persistent-cache.json (playtime and scheduler bookkeeping).
    pub fn persistent_cache_file(&self) -> PathBuf {
        self.root.join("persistent-cache.json")
    }

    /// Path to config.toml (optional runtime configuration).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to logs/ directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// `%APPDATA%` on Windows, `~/Library/Application Support` on macOS,
/// `$XDG_CONFIG_HOME` or `~/.config` elsewhere.
pub fn default_butler_db_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(BUTLER_DB_RELATIVE_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_root_places_everything_under_root() {
        let root = PathBuf::from("/tmp/itch-bridge-test");
        let storage = StorageConfig::with_root(root.clone());

        assert_eq!(storage.socket_file(), root.join("bridge.sock"));
        assert_eq!(
            storage.persistent_cache_file(),
            root.join("persistent-cache.json")
        );
        assert_eq!(storage.config_file(), root.join("config.toml"));
        assert_eq!(storage.logs_dir(), root.join("logs"));
        assert_eq!(storage.butler_db(), root.join("butler.db").as_path());
    }

    #[test]
    fn butler_db_override_is_kept() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/a"))
            .with_butler_db(PathBuf::from("/data/butler.db"));
        assert_eq!(storage.butler_db(), Path::new("/data/butler.db"));
    }

    #[test]
    fn default_butler_path_ends_with_itch_db() {
        if let Some(path) = default_butler_db_path() {
            assert!(path.ends_with("itch/db/butler.db"));
        }
    }
}
