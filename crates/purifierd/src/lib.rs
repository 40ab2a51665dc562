//! purifierd bridges Xiaomi Mi Air Purifiers discovered on the local network
//! into HomeKit through a homebridge-mqtt instance.

pub mod accessory;
#[cfg(feature = "api")]
pub mod api;
pub mod bridge;
pub mod config;
pub mod discovery;
pub mod hap;
pub mod miio;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
