//! Demo configuration.
//!
//! Read from `$TRAYMENU_CONFIG` if set, otherwise from
//! `~/.config/traymenu/demo.toml`. A missing file means defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use traymenu_tray::TrayConfig;

const CONFIG_ENV: &str = "TRAYMENU_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Title of the status entry at the top of the menu.
    #[serde(default = "default_name")]
    pub name: String,

    /// Seconds before the demo quits on its own (0 = wait for Ctrl-C).
    #[serde(default = "default_quit_after")]
    pub quit_after_secs: u64,

    /// Simulate a few clicks once the menu is built.
    #[serde(default = "default_true")]
    pub scripted_clicks: bool,

    #[serde(default)]
    pub tray: TrayConfig,
}

fn default_name() -> String {
    "Tray demo".into()
}

fn default_quit_after() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            quit_after_secs: default_quit_after(),
            scripted_clicks: default_true(),
            tray: TrayConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration file, falling back to defaults if absent.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("traymenu")
        .join("demo.toml")
}
