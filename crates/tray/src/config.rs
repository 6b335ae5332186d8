//! Tray configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings applied to a session once it is initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrayConfig {
    /// Tooltip shown when hovering the tray icon.
    #[serde(default)]
    pub tooltip: Option<String>,

    /// `.ico` file used as the tray icon.
    #[serde(default)]
    pub icon_path: Option<PathBuf>,

    /// Open the menu on left-button release.
    #[serde(default = "default_true")]
    pub open_on_left_click: bool,

    /// Open the menu on right-button release.
    #[serde(default = "default_true")]
    pub open_on_right_click: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            tooltip: None,
            icon_path: None,
            open_on_left_click: default_true(),
            open_on_right_click: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tray_config_default() {
        let config = TrayConfig::default();
        assert!(config.tooltip.is_none());
        assert!(config.icon_path.is_none());
        assert!(config.open_on_left_click);
        assert!(config.open_on_right_click);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: TrayConfig = toml::from_str(r#"open_on_left_click = false"#).unwrap();
        assert!(!config.open_on_left_click);
        assert!(config.open_on_right_click);
        assert!(config.tooltip.is_none());
    }

    #[test]
    fn full_toml() {
        let toml_str = r#"
            tooltip = "Backup agent"
            icon_path = "/usr/share/icons/agent.ico"
            open_on_left_click = true
            open_on_right_click = false
        "#;
        let config: TrayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tooltip.as_deref(), Some("Backup agent"));
        assert_eq!(
            config.icon_path,
            Some(PathBuf::from("/usr/share/icons/agent.ico"))
        );
        assert!(!config.open_on_right_click);
    }
}
