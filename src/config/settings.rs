//! Persistent settings in TOML format

use crate::audio::QueueLimits;
use crate::pipeline::{CaptureTiming, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Directory under the user config dir holding the settings file
const APP_DIR: &str = "n3dsxl-capture";

/// Settings file name
const FILE_NAME: &str = "config.toml";

/// Settings loaded from and saved to `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reconnect automatically after a lost or failed connection
    pub auto_connect: bool,

    /// Playback volume, 0-100 in steps of 5
    pub volume: u32,

    /// Start muted
    pub mute: bool,

    /// Pause after a failed automatic connect, in milliseconds
    pub reconnect_cooldown_ms: u64,

    /// Capture loop pause while disconnected, in milliseconds
    pub idle_poll_ms: u64,

    /// Queued audio chunks tolerated before dropping
    pub sample_limit: usize,

    /// Consecutive audio drops tolerated before resetting playback
    pub drop_limit: u32,

    /// PNG shown while no frame is available (empty = black)
    pub placeholder: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_connect: false,
            volume: 100,
            mute: false,
            reconnect_cooldown_ms: 5000,
            idle_poll_ms: 5,
            sample_limit: 3,
            drop_limit: 3,
            placeholder: String::new(),
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl Settings {
    /// Default settings file location, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
    }

    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let settings: Settings = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        settings.validate()?;
        info!("Loaded settings from {:?}", path);
        Ok(settings.normalized())
    }

    /// Load from the default location, or defaults if there is no file
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("Settings file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save settings to a TOML file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Save to the default location
    pub fn save_default(&self) -> Result<(), ConfigError> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save(path)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volume > 100 {
            return Err(ConfigError::Invalid(format!(
                "volume must be 0-100, got {}",
                self.volume
            )));
        }
        if self.idle_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle_poll_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Snap the volume onto the 5-step grid
    fn normalized(mut self) -> Self {
        self.volume = self.volume.min(100) / 5 * 5;
        self
    }

    /// Placeholder image path, if one is configured
    pub fn placeholder_path(&self) -> Option<PathBuf> {
        if self.placeholder.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.placeholder))
        }
    }

    /// Convert to a pipeline configuration
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            auto_connect: self.auto_connect,
            volume: self.volume,
            muted: self.mute,
            timing: CaptureTiming {
                reconnect_cooldown: Duration::from_millis(self.reconnect_cooldown_ms),
                idle_poll: Duration::from_millis(self.idle_poll_ms),
                ..CaptureTiming::default()
            },
            limits: QueueLimits {
                sample_limit: self.sample_limit,
                drop_limit: self.drop_limit,
            },
            ..PipelineConfig::default()
        }
    }

    /// Generate a commented sample configuration file
    pub fn sample_config() -> String {
        r#"# n3dsxl-capture configuration

# Reconnect automatically when the board is lost or not yet plugged in
auto_connect = false

# Playback volume, 0-100 in steps of 5
volume = 100

# Start muted
mute = false

# Wait after a failed automatic connect, in milliseconds (default: 5000)
reconnect_cooldown_ms = 5000

# Capture loop pause while disconnected, in milliseconds (default: 5)
idle_poll_ms = 5

# Audio chunks allowed to queue up before new ones are dropped (default: 3)
sample_limit = 3

# Consecutive drops before playback is reset (default: 3)
drop_limit = 3

# 240x720 PNG shown while there is no signal (empty = black)
placeholder = ""

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
log_file = ""
"#
        .to_string()
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No user configuration directory on this platform")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("n3dsxl-capture-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let parsed: Settings = toml::from_str(&Settings::sample_config()).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Settings = toml::from_str("auto_connect = true\nvolume = 40\n").unwrap();
        assert!(parsed.auto_connect);
        assert_eq!(parsed.volume, 40);
        assert_eq!(parsed.reconnect_cooldown_ms, 5000);
        assert_eq!(parsed.log_level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("save_and_load.toml");
        let settings = Settings {
            auto_connect: true,
            volume: 35,
            mute: true,
            ..Default::default()
        };

        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_volume_snapped_on_load() {
        let path = temp_path("volume_snap.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "volume = 37\n").unwrap();

        assert_eq!(Settings::load(&path).unwrap().volume, 35);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let path = temp_path("malformed.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "volume = \"loud\"\n").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_volume_rejected() {
        let settings = Settings {
            volume: 120,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Settings::load(temp_path("does_not_exist.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_to_pipeline_config() {
        let settings = Settings {
            auto_connect: true,
            reconnect_cooldown_ms: 250,
            sample_limit: 5,
            ..Default::default()
        };
        let config = settings.to_pipeline_config();

        assert!(config.auto_connect);
        assert_eq!(config.timing.reconnect_cooldown, Duration::from_millis(250));
        assert_eq!(config.timing.idle_poll, Duration::from_millis(5));
        assert_eq!(config.limits.sample_limit, 5);
        assert_eq!(config.limits.drop_limit, 3);
    }
}
