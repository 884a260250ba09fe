use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::TimingMode;

/// Layered server configuration: built-in defaults, optional config file,
/// then `BCISERVER__`-prefixed environment variables, in that order of
/// increasing precedence.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub recorder: RecorderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    pub default_device: String,
    pub calibration_time_secs: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecorderConfig {
    pub ring_buffers: usize,
    pub ring_buffer_bytes: usize,
    pub default_timing_mode: TimingMode,
    pub default_buffer_size_seconds: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub log_path: String,
    pub log_level: String,
    pub diagnostic_logging: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            device: DeviceConfig::default(),
            recorder: RecorderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            default_device: "emulator".to_string(),
            calibration_time_secs: 10.0,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            ring_buffers: 4,
            ring_buffer_bytes: 65536,
            default_timing_mode: TimingMode::default(),
            default_buffer_size_seconds: 0.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_path: "./logs".to_string(),
            log_level: "info".to_string(),
            diagnostic_logging: true,
        }
    }
}

/// Load configuration from file with layered fallbacks: built-in defaults,
/// then an explicit or conventionally-named config file, then
/// `BCISERVER__`-prefixed environment overrides (e.g.
/// `BCISERVER__SERVER__PORT=9100`).
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "config file not found: {}",
                path.display()
            )));
        }
    } else {
        let possible_paths = ["bci-server.toml", "config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("BCISERVER")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize::<AppConfig>()
}

/// Load configuration with better error handling and defaults
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.recorder.ring_buffers, 4);
        assert_eq!(config.device.calibration_time_secs, 10.0);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/path.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Message(_)));
    }

    #[test]
    fn env_override_wins_over_defaults() {
        std::env::set_var("BCISERVER__SERVER__PORT", "9500");
        let config = load_config(None).unwrap();
        assert_eq!(config.server.port, 9500);
        std::env::remove_var("BCISERVER__SERVER__PORT");
    }
}
