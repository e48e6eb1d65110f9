use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config directory under `$XDG_CONFIG_HOME`.
const CONFIG_DIR: &str = "rdtype";
/// Default config file name.
const CONFIG_FILE: &str = "config.toml";

/// Resolve the default config file path.
///
/// Returns `$XDG_CONFIG_HOME/rdtype/config.toml` or
/// `~/.config/rdtype/config.toml`.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Load the configuration from a TOML file.
///
/// If `path` is `None`, reads from the default location.
/// Returns the default configuration if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path(),
    };

    if !path.exists() {
        tracing::debug!(?path, "Config file not found, using defaults");
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config: {}", path.display()))?;

    tracing::debug!(?path, "Configuration loaded");
    Ok(config)
}

/// Configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay between press and release of a tapped key, in milliseconds.
    pub tap_delay_ms: u64,

    /// Extra pause after every replayed key action, in milliseconds.
    pub action_delay_ms: u64,

    /// Ask the portal to remember the grant and reuse its restore token.
    pub persist_grant: bool,

    /// Override for the state file holding the restore token.
    pub state_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tap_delay_ms: 20,
            action_delay_ms: 0,
            persist_grant: true,
            state_path: None,
        }
    }
}
