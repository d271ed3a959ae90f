//! Persistent user settings.
//!
//! Lives at `<config dir>/modtui/config.toml`. Every field is optional;
//! command-line flags win over the file, the file wins over defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracker_player::config::{Interpolation, OutputConfig, PlaybackConfig};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Stereo separation percent, 0-200.
    pub stereo_separation: Option<i32>,
    /// `default`, `none`, `linear`, `cubic` or `sinc`.
    pub interpolation: Option<String>,
    /// Output buffer in milliseconds.
    pub buffer_ms: Option<u32>,
    /// Output device name substring.
    pub device: Option<String>,
    /// Module played most recently.
    pub last_file: Option<String>,
}

/// Command-line values that take priority over the file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub stereo_separation: Option<i32>,
    pub interpolation: Option<Interpolation>,
    pub buffer_ms: Option<u32>,
    pub device: Option<String>,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("modtui").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<AppConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Like [`AppConfig::load`], but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
        }
        let raw = toml::to_string_pretty(self).context("serialize config")?;
        std::fs::write(path, raw).with_context(|| format!("write config {:?}", path))?;
        Ok(())
    }

    /// Merge file values, overrides and defaults into library settings.
    pub fn resolve(&self, overrides: &Overrides) -> Result<(PlaybackConfig, OutputConfig)> {
        let mut playback = PlaybackConfig::default();
        let mut output = OutputConfig::default();

        let separation = overrides.stereo_separation.or(self.stereo_separation);
        if let Some(separation) = separation {
            if !(0..=200).contains(&separation) {
                bail!("stereo separation must be between 0 and 200, got {separation}");
            }
            playback.stereo_separation = separation;
        }

        if let Some(quality) = overrides.interpolation {
            playback.interpolation = quality;
        } else if let Some(name) = &self.interpolation {
            playback.interpolation = name
                .parse()
                .map_err(anyhow::Error::msg)
                .context("interpolation in config")?;
        }

        if let Some(ms) = overrides.buffer_ms.or(self.buffer_ms) {
            output.buffer_ms = ms.max(10);
        }
        output.device = overrides.device.clone().or_else(|| self.device.clone());

        Ok((playback, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        let (playback, output) = cfg.resolve(&Overrides::default()).unwrap();
        assert_eq!(playback.stereo_separation, 50);
        assert_eq!(playback.interpolation, Interpolation::WindowedSinc);
        assert_eq!(output.buffer_ms, 60);
        assert!(output.device.is_none());
    }

    #[test]
    fn overrides_beat_file() {
        let cfg: AppConfig = toml::from_str(
            r#"
stereo_separation = 80
interpolation = "linear"
buffer_ms = 120
device = "usb"
"#,
        )
        .unwrap();
        let overrides = Overrides {
            stereo_separation: Some(150),
            interpolation: None,
            buffer_ms: None,
            device: Some("hdmi".to_string()),
        };
        let (playback, output) = cfg.resolve(&overrides).unwrap();
        assert_eq!(playback.stereo_separation, 150);
        assert_eq!(playback.interpolation, Interpolation::Linear);
        assert_eq!(output.buffer_ms, 120);
        assert_eq!(output.device.as_deref(), Some("hdmi"));
    }

    #[test]
    fn bad_values_are_rejected() {
        let cfg = AppConfig {
            stereo_separation: Some(300),
            ..AppConfig::default()
        };
        assert!(cfg.resolve(&Overrides::default()).is_err());

        let cfg = AppConfig {
            interpolation: Some("fancy".to_string()),
            ..AppConfig::default()
        };
        let err = cfg.resolve(&Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown interpolation"));
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = std::env::temp_dir().join(format!("modtui-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");
        let cfg = AppConfig {
            stereo_separation: Some(70),
            last_file: Some("/music/song.mod".to_string()),
            ..AppConfig::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(AppConfig::load_or_default(&path).unwrap(), cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_default() {
        let path = std::env::temp_dir().join("modtui-definitely-missing.toml");
        assert_eq!(AppConfig::load_or_default(&path).unwrap(), AppConfig::default());
    }
}
