//! Session configuration.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. Example:
//!
//! ```toml
//! [queue]
//! capacity = 65536
//! overflow = "drop-oldest"
//!
//! [acquisition]
//! chunk_size = 65536
//! poll_interval_ms = 50
//! width = 1280
//! height = 720
//!
//! [device]
//! dir = "/dev"
//! prefix = "evcam"
//! ```

use crate::queue::OverflowPolicy;
use crate::types::SensorMetadata;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Event queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum number of decoded events held between producer and consumers
    pub capacity: usize,
    /// Behaviour when the queue is full
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Source read settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    /// Bytes requested per `read_chunk`
    pub chunk_size: usize,
    /// Longest a device read may wait before the producer checks for stop
    pub poll_interval_ms: u64,
    /// Sensor width override, for sources that do not report geometry
    pub width: Option<u32>,
    /// Sensor height override
    pub height: Option<u32>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            poll_interval_ms: 50,
            width: None,
            height: None,
        }
    }
}

impl AcquisitionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Geometry override, when both dimensions are set.
    pub fn geometry(&self) -> Option<SensorMetadata> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(SensorMetadata::new(width, height)),
            _ => None,
        }
    }
}

/// Device discovery settings for the device-node driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Directory scanned for camera nodes
    pub dir: PathBuf,
    /// File name prefix identifying camera nodes
    pub prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/dev"),
            prefix: "evcam".to_string(),
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub queue: QueueConfig,
    pub acquisition: AcquisitionConfig,
    pub device: DeviceConfig,
}

impl SessionConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.capacity must be at least 1".to_string(),
            ));
        }
        if self.acquisition.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.acquisition.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        match (self.acquisition.width, self.acquisition.height) {
            (Some(0), _) | (_, Some(0)) => Err(ConfigError::Invalid(
                "acquisition.width and height must be non-zero".to_string(),
            )),
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::Invalid(
                "acquisition.width and height must be set together".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.queue.capacity, 65_536);
        assert_eq!(config.queue.overflow, OverflowPolicy::Block);
        assert_eq!(config.acquisition.poll_interval(), Duration::from_millis(50));
        assert!(config.acquisition.geometry().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = write_config("");
        assert_eq!(SessionConfig::load(file.path()).unwrap(), SessionConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let file = write_config(
            r#"
[queue]
capacity = 128
overflow = "drop-oldest"

[acquisition]
width = 640
height = 480
"#,
        );
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.queue.capacity, 128);
        assert_eq!(config.queue.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.acquisition.chunk_size, 64 * 1024);
        assert_eq!(
            config.acquisition.geometry(),
            Some(SensorMetadata::new(640, 480))
        );
        assert_eq!(config.device.prefix, "evcam");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let file = write_config("[queue]\nsize = 4\n");
        assert!(matches!(
            SessionConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_config("[queue]\ncapacity = 0\n");
        assert!(matches!(
            SessionConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let file = write_config("[acquisition]\nwidth = 640\n");
        assert!(matches!(
            SessionConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/evcap.toml"),
            Err(ConfigError::FileRead { .. })
        ));
    }
}
