//! CLI configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/exfs/exfs.toml`
//! - Windows: `%APPDATA%/exfs/exfs.toml`

use std::path::{Path, PathBuf};

use exfs_transfer::EngineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub engine: EngineConfig,

    /// Name patterns hidden from `ls` unless `--all` is given.
    #[serde(default = "default_ignores")]
    pub ignores: Vec<String>,
}

fn default_ignores() -> Vec<String> {
    vec!["*.temp".into(), "*.meta".into()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            ignores: default_ignores(),
        }
    }
}

impl Config {
    /// Loads the configuration at `path` (or the default location), writing
    /// defaults there first if the file does not exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Platform-specific default configuration file.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("exfs").join("exfs.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("exfs")
            .join("exfs.toml")
    }
}
