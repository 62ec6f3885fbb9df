//! Configuration loading and hot reload
//!
//! All keys are read-only inputs to the decision core: actors look at
//! the current snapshot at decision time through a watch channel, so a
//! reload takes effect on the next event without restarting monitors.

pub mod watcher;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

pub use watcher::ConfigWatcher;

/// How brightness changes are attributed to the user.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrightnessDetectionMode {
    /// Accept only deltas that are exact fine-step multiples. Works
    /// without the input-monitoring grant.
    StepBased,
    /// Accept changes that follow a recent brightness key press.
    Heuristic,
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Show the HUD for brightness changes at all.
    pub brightness_hud_enabled: bool,
    pub brightness_detection_mode: BrightnessDetectionMode,
    /// Anchor on the display under the pointer instead of the primary.
    pub hud_follows_mouse_display: bool,
    /// Bottom offset as a fraction of screen height rather than pixels.
    pub use_relative_positioning: bool,
    /// Consume media-key events and drive the hardware ourselves, so the
    /// system's own overlay never appears.
    pub hide_system_overlay: bool,
    /// Overlay auto-hide delay after the last content update.
    pub hide_delay_ms: u64,
    /// Anchor height above the bottom edge, fixed-pixel mode.
    pub bottom_offset_px: f32,
    /// Anchor height above the bottom edge, relative mode.
    pub bottom_fraction: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            brightness_hud_enabled: true,
            brightness_detection_mode: BrightnessDetectionMode::Heuristic,
            hud_follows_mouse_display: false,
            use_relative_positioning: true,
            hide_system_overlay: false,
            hide_delay_ms: 1050,
            bottom_offset_px: 60.0,
            bottom_fraction: 0.1,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load from a YAML file, falling back to defaults when the file
    /// does not exist (parse errors still fail).
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("no config file at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Default config location: `<user config dir>/machud/config.yaml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("machud")
            .join("config.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert!(cfg.brightness_hud_enabled);
        assert_eq!(
            cfg.brightness_detection_mode,
            BrightnessDetectionMode::Heuristic
        );
        assert!(!cfg.hide_system_overlay);
        assert!(cfg.hide_delay_ms >= 1000 && cfg.hide_delay_ms <= 1100);
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let cfg: AppConfig = serde_yaml::from_str(
            r#"
brightness_detection_mode: step_based
hide_system_overlay: true
"#,
        )
        .unwrap();
        assert_eq!(
            cfg.brightness_detection_mode,
            BrightnessDetectionMode::StepBased
        );
        assert!(cfg.hide_system_overlay);
        // Untouched keys keep their defaults
        assert!(cfg.brightness_hud_enabled);
        assert_eq!(cfg.hide_delay_ms, 1050);
    }

    #[test]
    fn rejects_unknown_keys() {
        let result: std::result::Result<AppConfig, _> =
            serde_yaml::from_str("brightnes_hud_enabled: true");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_detection_mode() {
        let result: std::result::Result<AppConfig, _> =
            serde_yaml::from_str("brightness_detection_mode: clever");
        assert!(result.is_err());
    }

    #[test]
    fn yaml_roundtrip() {
        let cfg = AppConfig {
            hud_follows_mouse_display: true,
            bottom_offset_px: 42.0,
            ..AppConfig::default()
        };
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, cfg);
    }

    #[tokio::test]
    async fn load_or_default_handles_missing_file() {
        let cfg = AppConfig::load_or_default("/definitely/not/here.yaml")
            .await
            .unwrap();
        assert_eq!(cfg, AppConfig::default());
    }
}
