mod air_purifier;

pub use air_purifier::AirPurifier;
pub use air_purifier::ServiceDefinition;
pub use air_purifier::{MANUFACTURER, MODEL};

/// Errors reported to the bridge by characteristic setters
#[derive(Debug, thiserror::Error)]
pub enum AccessoryError {
    #[error("no air purifier is discovered for '{0}'")]
    NoDevice(String),
}
