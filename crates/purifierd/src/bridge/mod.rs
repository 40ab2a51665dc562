//! MQTT surface towards the host HomeKit bridge.
//!
//! purifierd speaks the homebridge-mqtt JSON contract: accessories are
//! registered on `<base>/to/add` (additional services on
//! `<base>/to/add/service`), characteristic writes arrive on
//! `<base>/from/set`, reads on `<base>/from/get`, and values are reported
//! back on `<base>/to/set`.

mod client;
mod runner;

pub use client::MqttClient;
pub use client::MqttMessage;
pub use client::RumqttcClient;
pub use runner::BridgeRunner;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("MQTT client not connected")]
    NotConnected,

    #[error("MQTT request failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Failed to encode bridge payload: {0}")]
    Encode(#[from] serde_json::Error),
}
