//! Configuration loading and config file resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable that may point at the config file
pub const CONFIG_ENV_VAR: &str = "KTV_CONFIG";

/// Config file name looked up in the user config directory
pub const CONFIG_FILE_NAME: &str = "ktv.toml";

/// Full TOML configuration
///
/// Every section and field has a default, so an empty file (or no file at
/// all) yields a working configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KtvConfig {
    pub telemetry: TelemetryConfig,
    pub playback: PlaybackConfig,
    pub queue: QueueConfig,
    pub events: EventsConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

/// Audio-frame telemetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Frames that carry a changed payload before going quiet
    pub retransmit_frames: u32,
    /// Interval at which remote pitch/score changes are turned into events
    pub remote_poll_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            retransmit_frames: 5,
            remote_poll_ms: 50,
        }
    }
}

/// Playback state machine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Grace period for the final score display before advancing
    pub score_display_delay_ms: u64,
    /// Scoring flag the lead singer publishes when the room disagrees
    pub default_scoring_enabled: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            score_display_delay_ms: 5000,
            default_scoring_enabled: true,
        }
    }
}

/// Waiting queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Entries requested per page on the initial fetch
    pub page_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Song catalog settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog service base URL (None = no remote catalog)
    pub base_url: Option<String>,
    /// Directory holding bundled demo tracks
    pub local_assets_dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            local_assets_dir: PathBuf::from("assets/songs"),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter level when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl KtvConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: KtvConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// Unlike [`KtvConfig::load_or_default`], a missing file is an error here.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration, degrading to defaults when no file is present
    ///
    /// A missing file logs a warning and yields defaults. A file that exists
    /// but fails to parse or validate is still an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load(path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.queue.page_size == 0 {
            return Err(Error::Config("queue.page_size must be at least 1".to_string()));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config("events.capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Config file resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. User config directory (`<config dir>/ktv/ktv.toml`) if it exists
/// 4. None: compiled defaults
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: per-user config file
    dirs::config_dir()
        .map(|d| d.join("ktv").join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = KtvConfig::from_toml_str("").unwrap();
        assert_eq!(config, KtvConfig::default());
        assert_eq!(config.telemetry.retransmit_frames, 5);
        assert_eq!(config.playback.score_display_delay_ms, 5000);
        assert!(config.playback.default_scoring_enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = KtvConfig::from_toml_str(
            r#"
            [telemetry]
            retransmit_frames = 8

            [catalog]
            base_url = "https://catalog.example"
            "#,
        )
        .unwrap();
        assert_eq!(config.telemetry.retransmit_frames, 8);
        assert_eq!(config.catalog.base_url.as_deref(), Some("https://catalog.example"));
        assert_eq!(config.catalog.local_assets_dir, PathBuf::from("assets/songs"));
        assert_eq!(config.queue.page_size, 20);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let err = KtvConfig::from_toml_str("[queue]\npage_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = KtvConfig::from_toml_str("[telemetry\nretransmit_frames = ").unwrap_err();
        assert!(matches!(err, Error::TomlParse(_)));
    }
}
