//! HomeKit vocabulary used on the bridge wire.
//!
//! Service and characteristic names serialize exactly as the host bridge
//! spells them in its JSON payloads; the value enums carry the HAP numeric
//! codes.

use serde::{Deserialize, Serialize};

/// HomeKit service types exposed by purifierd accessories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    AirPurifier,
    AirQualitySensor,
    TemperatureSensor,
    HumiditySensor,
}

impl Service {
    /// Service name used when registering with the bridge
    pub fn name(&self) -> &'static str {
        match self {
            Service::AirPurifier => "AirPurifier",
            Service::AirQualitySensor => "AirQualitySensor",
            Service::TemperatureSensor => "TemperatureSensor",
            Service::HumiditySensor => "HumiditySensor",
        }
    }
}

/// Characteristics purifierd reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Characteristic {
    Active,
    RotationSpeed,
    TargetAirPurifierState,
    CurrentAirPurifierState,
    AirQuality,
    CurrentTemperature,
    CurrentRelativeHumidity,
}

/// HAP Active characteristic values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Active {
    #[default]
    Inactive,
    Active,
}

impl Active {
    pub fn code(self) -> u8 {
        match self {
            Active::Inactive => 0,
            Active::Active => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Active::Inactive),
            1 => Some(Active::Active),
            _ => None,
        }
    }
}

/// HAP TargetAirPurifierState characteristic values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetAirPurifierState {
    Manual,
    #[default]
    Auto,
}

impl TargetAirPurifierState {
    pub fn code(self) -> u8 {
        match self {
            TargetAirPurifierState::Manual => 0,
            TargetAirPurifierState::Auto => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TargetAirPurifierState::Manual),
            1 => Some(TargetAirPurifierState::Auto),
            _ => None,
        }
    }
}

/// HAP CurrentAirPurifierState characteristic values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurrentAirPurifierState {
    #[default]
    Inactive,
    Idle,
    PurifyingAir,
}

impl CurrentAirPurifierState {
    pub fn code(self) -> u8 {
        match self {
            CurrentAirPurifierState::Inactive => 0,
            CurrentAirPurifierState::Idle => 1,
            CurrentAirPurifierState::PurifyingAir => 2,
        }
    }
}

/// HAP AirQuality characteristic values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AirQuality {
    #[default]
    Unknown,
    Excellent,
    Good,
    Fair,
    Inferior,
    Poor,
}

impl AirQuality {
    pub fn code(self) -> u8 {
        match self {
            AirQuality::Unknown => 0,
            AirQuality::Excellent => 1,
            AirQuality::Good => 2,
            AirQuality::Fair => 3,
            AirQuality::Inferior => 4,
            AirQuality::Poor => 5,
        }
    }
}

/// Extract a numeric characteristic value from a bridge JSON payload.
///
/// The bridge is loose about types: booleans, numbers, and numeric strings
/// all appear for the same characteristic depending on the client.
pub fn value_to_u8(value: &serde_json::Value) -> Option<u8> {
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|v| v as u64))
        .or_else(|| value.as_bool().map(u64::from))
        .or_else(|| value.as_str().and_then(|raw| raw.parse::<u64>().ok()))
        .and_then(|v| u8::try_from(v).ok())
}

/// Extract a floating point characteristic value from a bridge JSON payload
pub fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|v| v as f64))
        .or_else(|| value.as_str().and_then(|raw| raw.parse::<f64>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names_match_serialization() {
        let json = serde_json::to_string(&Service::AirQualitySensor).unwrap();
        assert_eq!(json, "\"AirQualitySensor\"");
        assert_eq!(Service::AirQualitySensor.name(), "AirQualitySensor");
    }

    #[test]
    fn test_characteristic_roundtrip() {
        let json = serde_json::to_string(&Characteristic::RotationSpeed).unwrap();
        let parsed: Characteristic = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Characteristic::RotationSpeed);
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(value_to_u8(&serde_json::json!(1)), Some(1));
        assert_eq!(value_to_u8(&serde_json::json!(true)), Some(1));
        assert_eq!(value_to_u8(&serde_json::json!("0")), Some(0));
        assert_eq!(value_to_u8(&serde_json::json!("on")), None);
        assert_eq!(value_to_f64(&serde_json::json!(62.5)), Some(62.5));
        assert_eq!(value_to_f64(&serde_json::json!("50")), Some(50.0));
    }

    #[test]
    fn test_hap_codes() {
        assert_eq!(Active::Active.code(), 1);
        assert_eq!(Active::from_code(2), None);
        assert_eq!(TargetAirPurifierState::Manual.code(), 0);
        assert_eq!(CurrentAirPurifierState::PurifyingAir.code(), 2);
        assert_eq!(AirQuality::Poor.code(), 5);
        assert_eq!(AirQuality::default(), AirQuality::Unknown);
    }
}
