//! Configuration file parsing and structures.
//!
//! purifierd uses TOML for declarative configuration: one `[bridge]` block
//! for the MQTT connection to the host bridge, an optional `[api]` block for
//! the HTTP status API, and one `[[accessory]]` block per purifier.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    pub bridge: BridgeConfig,

    #[serde(default)]
    pub api: Option<ApiConfig>,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default, rename = "accessory")]
    pub accessories: Vec<AccessoryConfig>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// MQTT connection to the host bridge (homebridge-mqtt topic contract)
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT client ID
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Base topic the bridge listens on (default: "homebridge")
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "purifierd".to_string()
}

fn default_base_topic() -> String {
    "homebridge".to_string()
}

/// HTTP status API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,

    #[serde(default = "default_api_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8566
}

/// Device discovery backend selection
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub backend: DeviceBackend,
}

/// Which `DeviceBrowser` implementation to run.
///
/// Only the in-process simulator ships with purifierd; a real miio transport
/// plugs in behind the same trait.
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    #[default]
    Simulated,
}

/// Per-purifier accessory configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AccessoryConfig {
    /// Accessory name shown in HomeKit
    #[serde(default = "default_accessory_name")]
    pub name: String,

    /// miio device identifier to bind to
    pub device_id: String,

    /// miio session token for the device
    pub device_token: String,

    /// Expose an AirQualitySensor sub-service
    #[serde(default)]
    pub show_air_quality: bool,

    /// Expose a TemperatureSensor sub-service
    #[serde(default)]
    pub show_temperature: bool,

    /// Expose a HumiditySensor sub-service
    #[serde(default)]
    pub show_humidity: bool,

    /// When the device is on, report CurrentAirPurifierState as PurifyingAir
    /// (true) or Inactive (false). The device does not expose enough state to
    /// derive Idle, so this report is a declared stub either way.
    #[serde(default = "default_assume_purifying")]
    pub assume_purifying: bool,
}

fn default_accessory_name() -> String {
    "Air Purifier".to_string()
}

fn default_assume_purifying() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    ///
    /// Each accessory must name both a device_id and a device_token; without
    /// them discovery can never bind a device to the accessory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for accessory in &self.accessories {
            if accessory.device_id.is_empty() || accessory.device_token.is_empty() {
                return Err(ConfigError::MissingDeviceIdentity(accessory.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Accessory '{0}' requires both device_id and device_token")]
    MissingDeviceIdentity(String),
}
