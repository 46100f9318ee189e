//! Console settings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ppb_engine::EngineConfig;
use serde::{Deserialize, Serialize};

/// Persisted console settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Bridge IP address
    pub bridge_ip: String,
    /// Bridge UDP port
    pub bridge_port: u16,
    /// Default unit address
    pub address: String,
    /// Default request period
    #[serde(default)]
    pub period: u8,
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge_ip: "192.168.1.50".to_string(),
            bridge_port: 5000,
            address: "0x0001".to_string(),
            period: 0,
            engine: EngineConfig::default(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for ppb-link
    /// Uses $XDG_CONFIG_HOME/ppb-link on Linux/macOS, falls back to ~/.config/ppb-link
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("ppb-link"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("ppb-link"))
    }

    /// Get the default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`, or from the default location
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Save settings to `path`, or to the default location
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .context("Could not determine settings path")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, json).context("Failed to write settings")?;

        Ok(path)
    }
}
