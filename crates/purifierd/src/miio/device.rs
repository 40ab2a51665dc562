use std::net::IpAddr;

use async_trait::async_trait;
use strum::{Display, EnumString};

use super::MiioError;

/// Operating modes of a Mi Air Purifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceMode {
    Auto,
    Silent,
    Favorite,
    Idle,
}

/// A live session with a discovered device.
///
/// Property getters are synchronous reads of the state cached by the device
/// session; the session's own refresh policy is the library's concern.
/// Commands are asynchronous and purifierd does not wait for their outcome
/// before acknowledging the bridge.
#[async_trait]
pub trait Device: Send + Sync {
    fn id(&self) -> &str;

    /// Device model family reported by the handshake (e.g. "air-purifier")
    fn device_type(&self) -> &str;

    fn address(&self) -> IpAddr;

    fn port(&self) -> u16;

    /// Whether the device is powered on
    fn power(&self) -> bool;

    fn mode(&self) -> DeviceMode;

    /// Favorite-mode fan level, 0-16
    fn favorite_level(&self) -> u8;

    /// Last air quality index reading
    fn aqi(&self) -> f64;

    /// Temperature in degrees Celsius, as reported
    fn temperature(&self) -> f64;

    /// Relative humidity in percent, as reported
    fn humidity(&self) -> f64;

    async fn set_power(&self, on: bool) -> Result<(), MiioError>;

    async fn set_mode(&self, mode: DeviceMode) -> Result<(), MiioError>;

    async fn set_favorite_level(&self, level: u8) -> Result<(), MiioError>;

    /// Close the session and release the underlying transport
    async fn destroy(&self);
}
