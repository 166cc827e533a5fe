//! Configuration management for layoutkeep
//!
//! Handles loading and validation of `layoutkeep.toml`. Every section is
//! optional; missing fields take their defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backup::BackupConfig;
use crate::capture::CaptureConfig;
use crate::error::{ConfigError, StoreError};
use crate::geometry::GeometryConfig;
use crate::logging::LogConfig;
use crate::restore::RestoreConfig;
use crate::store::StoreConfig;

/// Directory name under the platform config/data roots.
pub const APP_DIR: &str = "layoutkeep";

/// Config file name.
pub const CONFIG_FILE: &str = "layoutkeep.toml";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other} (expected pretty or json)")),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,

    /// Virtual frame, window floor and tiling threshold
    #[serde(default)]
    pub geometry: GeometryConfig,

    /// Capture settings
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Restore pipeline limits and delays
    #[serde(default)]
    pub restore: RestoreConfig,

    /// Arrangement store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Backup settings
    #[serde(default)]
    pub backup: BackupConfig,
}

impl Config {
    /// Platform path of the default config file, if the platform has one.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from a specific path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(display, e.to_string()))?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        let g = &self.geometry;
        if !(g.virtual_width > 0.0 && g.virtual_height > 0.0) {
            return invalid("geometry.virtual_width and virtual_height must be positive".into());
        }
        if !(g.min_window_width > 0.0 && g.min_window_height > 0.0) {
            return invalid("geometry.min_window_width and min_window_height must be positive".into());
        }
        if !(g.tiling_threshold.is_finite() && g.tiling_threshold > 0.0) {
            return invalid("geometry.tiling_threshold must be a positive number".into());
        }

        let s = &self.store;
        if !(1..=StoreConfig::HARD_MAX_ENTRIES).contains(&s.max_entries_limit) {
            return invalid(format!(
                "store.max_entries_limit must be between 1 and {}",
                StoreConfig::HARD_MAX_ENTRIES
            ));
        }
        if !(1..=s.max_entries_limit).contains(&s.default_max_entries) {
            return invalid("store.default_max_entries must be between 1 and max_entries_limit".into());
        }

        if self.restore.max_popouts == 0 {
            return invalid("restore.max_popouts must be at least 1".into());
        }
        if self.restore.size_walk_hops == 0 {
            return invalid("restore.size_walk_hops must be at least 1".into());
        }
        if self.capture.proxy_view_type.trim().is_empty() {
            return invalid("capture.proxy_view_type must not be empty".into());
        }
        if self.backup.keep == 0 {
            return invalid("backup.keep must be at least 1".into());
        }
        Ok(())
    }

    /// Directory holding one persisted unit per arrangement key.
    pub fn data_dir(&self) -> Result<PathBuf, StoreError> {
        match &self.store.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR).join("arrangements"))
                .ok_or(StoreError::NoDataDir),
        }
    }

    /// Directory holding backup files.
    pub fn backup_dir(&self) -> Result<PathBuf, StoreError> {
        match &self.backup.dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR).join("backups"))
                .ok_or(StoreError::NoDataDir),
        }
    }
}
