//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! filament-config.toml file. It covers the tag page range, the timing of the
//! rotation detector and the four-digit display. Every section may be omitted;
//! missing values take the defaults below.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "filament-config.toml";

/// Application configuration loaded from filament-config.toml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Tag memory layout
    pub tag: TagConfig,
    /// Rotation detection and polling timing
    pub tracker: TrackerConfig,
    /// Display cycling
    pub display: DisplayConfig,
}

/// Where the spool document lives on the tag
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TagConfig {
    /// First page of the NDEF area (4 on NTAG21x)
    pub start_page: u16,
    /// Upper bound on pages fetched per document read
    pub max_read_pages: u16,
}

/// Timing of the polling loop and the rotation detector
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Time without the tag, after a confirmed sighting, that counts as one
    /// full revolution of the spool
    pub absence_threshold_ms: u64,
    /// Multiple of the absence threshold after which the spool is forgotten
    pub reset_factor: u32,
    /// Passive target scan timeout handed to the reader
    pub scan_timeout_ms: u64,
    /// Pause at the end of each loop iteration
    pub loop_delay_ms: u64,
}

/// Four-digit display behaviour
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Time each view (type, grams, metres) stays on screen
    pub interval_ms: u64,
    /// Segment brightness, 0 (dim) to 7 (bright)
    pub brightness: u8,
}

impl Default for TagConfig {
    fn default() -> Self {
        TagConfig {
            start_page: crate::START_PAGE,
            max_read_pages: crate::MAX_PAGE - crate::START_PAGE + 1,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            absence_threshold_ms: 5000,
            reset_factor: 4,
            scan_timeout_ms: 100,
            loop_delay_ms: 50,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            interval_ms: 1000,
            brightness: 7,
        }
    }
}

impl TrackerConfig {
    /// Absence after which tracked state is dropped.
    pub fn reset_after_ms(&self) -> u64 {
        self.absence_threshold_ms
            .saturating_mul(self.reset_factor.max(1) as u64)
    }
}

impl Config {
    /// Load configuration from filament-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config.sanitised()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }

    /// Clamp values that would otherwise break the hardware contract.
    fn sanitised(mut self) -> Self {
        if self.display.brightness > 7 {
            warn!(
                brightness = self.display.brightness,
                "display brightness above 7, clamping"
            );
            self.display.brightness = 7;
        }
        if self.tag.start_page < crate::START_PAGE {
            warn!(
                start_page = self.tag.start_page,
                "start page inside the tag header, using {}",
                crate::START_PAGE
            );
            self.tag.start_page = crate::START_PAGE;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tag.start_page, 4);
        assert_eq!(config.tag.max_read_pages, 131);
        assert_eq!(config.tracker.absence_threshold_ms, 5000);
        assert_eq!(config.tracker.reset_after_ms(), 20_000);
        assert_eq!(config.display.interval_ms, 1000);
        assert_eq!(config.display.brightness, 7);
    }

    #[test]
    fn test_config_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.tracker.absence_threshold_ms = 3000;
        config.save(file.path()).unwrap();

        let loaded = Config::load_from_path(file.path());
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[display]\nbrightness = 3\n").unwrap();
        assert_eq!(config.display.brightness, 3);
        assert_eq!(config.display.interval_ms, 1000);
        assert_eq!(config.tracker, TrackerConfig::default());
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let file = NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            "[display]\nbrightness = 12\n[tag]\nstart_page = 1\n",
        )
        .unwrap();

        let config = Config::load_from_path(file.path());
        assert_eq!(config.display.brightness, 7);
        assert_eq!(config.tag.start_page, 4);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "tracker = 'nope'").unwrap();
        assert_eq!(Config::load_from_path(file.path()), Config::default());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config, Config::default());
    }
}
