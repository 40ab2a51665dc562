use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::{MqttClient, MqttMessage};
use super::BridgeError;
use crate::accessory::{AirPurifier, MANUFACTURER, MODEL};
use crate::hap::{self, Active, Characteristic, TargetAirPurifierState};

/// Characteristic write pushed by the bridge
#[derive(Debug, Deserialize)]
struct IncomingWrite {
    name: String,
    characteristic: Characteristic,
    value: Value,
}

/// Characteristic read requested by the bridge
#[derive(Debug, Deserialize)]
struct IncomingRead {
    name: String,
    characteristic: Characteristic,
}

#[derive(Debug, Deserialize)]
struct IncomingIdentify {
    name: String,
}

/// Characteristic value reported to the bridge
#[derive(Debug, Serialize)]
struct OutgoingValue<'a> {
    name: &'a str,
    service_name: &'a str,
    characteristic: Characteristic,
    value: Value,
}

/// Accessory/service registration payload
#[derive(Debug, Serialize)]
struct Registration<'a> {
    name: &'a str,
    service_name: &'a str,
    service: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    manufacturer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// Event loop between the bridge and the accessories.
///
/// Registers every accessory on startup, then routes incoming get/set/identify
/// requests to characteristic handlers. Setter acknowledgements are implicit
/// and immediate; device command outcomes are never awaited, so the bridge
/// sees no error beyond what the logs carry.
pub struct BridgeRunner<C: MqttClient> {
    client: C,
    accessories: Vec<Arc<AirPurifier>>,
    base_topic: String,
}

impl<C: MqttClient> BridgeRunner<C> {
    pub fn new(client: C, accessories: Vec<Arc<AirPurifier>>, base_topic: String) -> Self {
        Self {
            client,
            accessories,
            base_topic,
        }
    }

    /// Connect, register the accessories, and process bridge requests until
    /// the connection closes
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        self.client.connect().await?;

        for suffix in ["from/set", "from/get", "from/identify"] {
            let topic = format!("{}/{}", self.base_topic, suffix);
            self.client.subscribe(&topic).await?;
        }

        self.register_accessories().await?;
        info!("Bridge connection ready on base topic '{}'", self.base_topic);

        while let Some(msg) = self.client.poll_message().await {
            self.handle_message(msg).await;
        }

        info!("Bridge connection closed");
        Ok(())
    }

    /// Announce every accessory and its services to the bridge
    async fn register_accessories(&mut self) -> Result<(), BridgeError> {
        let add_topic = format!("{}/to/add", self.base_topic);
        let add_service_topic = format!("{}/to/add/service", self.base_topic);

        let mut payloads = Vec::new();
        for accessory in &self.accessories {
            for (index, definition) in accessory.services().iter().enumerate() {
                let first = index == 0;
                let registration = Registration {
                    name: accessory.name(),
                    service_name: &definition.service_name,
                    service: definition.service.name(),
                    manufacturer: first.then_some(MANUFACTURER),
                    model: first.then_some(MODEL),
                };
                let topic = if first { &add_topic } else { &add_service_topic };
                payloads.push((topic.clone(), serde_json::to_vec(&registration)?));
            }
            info!("Registered accessory '{}'", accessory.name());
        }

        for (topic, payload) in payloads {
            self.client.publish(&topic, payload).await?;
        }
        Ok(())
    }

    async fn handle_message(&mut self, msg: MqttMessage) {
        let suffix = msg
            .topic
            .strip_prefix(&self.base_topic)
            .and_then(|rest| rest.strip_prefix('/'));

        match suffix {
            Some("from/set") => self.handle_set(&msg.payload).await,
            Some("from/get") => self.handle_get(&msg.payload).await,
            Some("from/identify") => self.handle_identify(&msg.payload),
            _ => debug!("Ignoring message on unexpected topic: {}", msg.topic),
        }
    }

    async fn handle_set(&mut self, payload: &[u8]) {
        let incoming: IncomingWrite = match serde_json::from_slice(payload) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Malformed set request from bridge: {}", e);
                return;
            }
        };

        let accessory = match self.accessory_by_name(&incoming.name) {
            Some(accessory) => accessory,
            None => {
                warn!("Set request for unknown accessory '{}'", incoming.name);
                return;
            }
        };

        let result = match incoming.characteristic {
            Characteristic::Active => {
                match hap::value_to_u8(&incoming.value).and_then(Active::from_code) {
                    Some(state) => accessory.set_power_state(state).await,
                    None => {
                        warn!("Invalid Active payload: {}", incoming.value);
                        return;
                    }
                }
            }
            Characteristic::TargetAirPurifierState => {
                match hap::value_to_u8(&incoming.value) {
                    // Out-of-range target states intentionally map through
                    // None and park the device in idle
                    Some(code) => {
                        accessory
                            .set_mode(TargetAirPurifierState::from_code(code))
                            .await
                    }
                    None => {
                        warn!(
                            "Invalid TargetAirPurifierState payload: {}",
                            incoming.value
                        );
                        return;
                    }
                }
            }
            Characteristic::RotationSpeed => match hap::value_to_f64(&incoming.value) {
                Some(speed) => accessory.set_rotation_speed(speed).await,
                None => {
                    warn!("Invalid RotationSpeed payload: {}", incoming.value);
                    return;
                }
            },
            other => {
                warn!("Characteristic {:?} is not writable", other);
                return;
            }
        };

        if let Err(e) = result {
            // Nothing is surfaced to the bridge; the accessory simply keeps
            // its last reported state
            warn!("Set {:?} on '{}' failed: {}", incoming.characteristic, incoming.name, e);
        }
    }

    async fn handle_get(&mut self, payload: &[u8]) {
        let incoming: IncomingRead = match serde_json::from_slice(payload) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Malformed get request from bridge: {}", e);
                return;
            }
        };

        let accessory = match self.accessory_by_name(&incoming.name) {
            Some(accessory) => accessory,
            None => {
                warn!("Get request for unknown accessory '{}'", incoming.name);
                return;
            }
        };

        let value = Self::current_value(&accessory, incoming.characteristic);
        let service_name = Self::service_name_for(&accessory, incoming.characteristic);
        let outgoing = OutgoingValue {
            name: accessory.name(),
            service_name: &service_name,
            characteristic: incoming.characteristic,
            value,
        };

        let payload = match serde_json::to_vec(&outgoing) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode value report: {}", e);
                return;
            }
        };

        let topic = format!("{}/to/set", self.base_topic);
        if let Err(e) = self.client.publish(&topic, payload).await {
            warn!("Failed to report {:?}: {}", incoming.characteristic, e);
        }
    }

    fn handle_identify(&self, payload: &[u8]) {
        let incoming: IncomingIdentify = match serde_json::from_slice(payload) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Malformed identify request from bridge: {}", e);
                return;
            }
        };

        if let Some(accessory) = self.accessory_by_name(&incoming.name) {
            accessory.identify();
        }
    }

    fn accessory_by_name(&self, name: &str) -> Option<Arc<AirPurifier>> {
        self.accessories
            .iter()
            .find(|accessory| accessory.name() == name)
            .cloned()
    }

    /// Getters always produce a value; absent devices read as the documented
    /// defaults
    fn current_value(accessory: &AirPurifier, characteristic: Characteristic) -> Value {
        match characteristic {
            Characteristic::Active => Value::from(accessory.power_state().code()),
            Characteristic::RotationSpeed => Value::from(accessory.rotation_speed()),
            Characteristic::TargetAirPurifierState => Value::from(accessory.mode().code()),
            Characteristic::CurrentAirPurifierState => {
                Value::from(accessory.current_state().code())
            }
            Characteristic::AirQuality => Value::from(accessory.air_quality().code()),
            Characteristic::CurrentTemperature => Value::from(accessory.current_temperature()),
            Characteristic::CurrentRelativeHumidity => {
                Value::from(accessory.current_relative_humidity())
            }
        }
    }

    fn service_name_for(accessory: &AirPurifier, characteristic: Characteristic) -> String {
        accessory
            .services()
            .into_iter()
            .find(|definition| definition.characteristics.contains(&characteristic))
            .map(|definition| definition.service_name)
            .unwrap_or_else(|| accessory.name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::super::client::MockMqttClient;
    use super::*;
    use crate::config::AccessoryConfig;
    use crate::miio::simulated::SimulatedDevice;
    use crate::miio::Device;

    fn accessory(show_air_quality: bool) -> (Arc<AirPurifier>, Arc<SimulatedDevice>) {
        let accessory = Arc::new(AirPurifier::new(AccessoryConfig {
            name: "Air Purifier".to_string(),
            device_id: "miio:04ab77f1".to_string(),
            device_token: "00112233445566778899aabbccddeeff".to_string(),
            show_air_quality,
            show_temperature: false,
            show_humidity: false,
            assume_purifying: true,
        }));
        let device = Arc::new(SimulatedDevice::new(
            "miio:04ab77f1".to_string(),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            54321,
        ));
        accessory.attach(device.clone());
        (accessory, device)
    }

    fn published_json(client_log: &[(String, Vec<u8>)], index: usize) -> (String, Value) {
        let (topic, payload) = &client_log[index];
        (topic.clone(), serde_json::from_slice(payload).unwrap())
    }

    #[tokio::test]
    async fn test_registration_payloads() {
        let (accessory, _device) = accessory(true);
        let mut runner = BridgeRunner::new(
            MockMqttClient::new(),
            vec![accessory],
            "homebridge".to_string(),
        );

        runner.run().await.unwrap();

        assert_eq!(
            runner.client.subscriptions,
            vec![
                "homebridge/from/set",
                "homebridge/from/get",
                "homebridge/from/identify"
            ]
        );

        let (topic, payload) = published_json(&runner.client.published, 0);
        assert_eq!(topic, "homebridge/to/add");
        assert_eq!(payload["name"], "Air Purifier");
        assert_eq!(payload["service"], "AirPurifier");
        assert_eq!(payload["manufacturer"], "Xiaomi");
        assert_eq!(payload["model"], "Air Purifier");

        let (topic, payload) = published_json(&runner.client.published, 1);
        assert_eq!(topic, "homebridge/to/add/service");
        assert_eq!(payload["service"], "AirQualitySensor");
        assert_eq!(payload["service_name"], "Air Quality Sensor");
        assert!(payload.get("manufacturer").is_none());
    }

    #[tokio::test]
    async fn test_set_routes_to_accessory() {
        let (accessory, device) = accessory(false);
        let mut client = MockMqttClient::new();
        client.queue(
            "homebridge/from/set",
            serde_json::json!({
                "name": "Air Purifier",
                "service_name": "Air Purifier",
                "characteristic": "Active",
                "value": 1
            }),
        );
        client.queue(
            "homebridge/from/set",
            serde_json::json!({
                "name": "Air Purifier",
                "service_name": "Air Purifier",
                "characteristic": "RotationSpeed",
                "value": 50
            }),
        );

        let mut runner = BridgeRunner::new(client, vec![accessory], "homebridge".to_string());
        runner.run().await.unwrap();
        // Commands run on a spawned task after the setter acknowledges
        tokio::task::yield_now().await;

        assert!(device.power());
        assert_eq!(device.favorite_level(), 8);
    }

    #[tokio::test]
    async fn test_get_replies_with_value() {
        let (accessory, device) = accessory(false);
        device.set_readings(42.0, 23.5, 55.0);

        let mut client = MockMqttClient::new();
        client.queue(
            "homebridge/from/get",
            serde_json::json!({
                "name": "Air Purifier",
                "characteristic": "CurrentTemperature"
            }),
        );

        let mut runner = BridgeRunner::new(client, vec![accessory], "homebridge".to_string());
        runner.run().await.unwrap();

        // Registration publish comes first, then the reply
        let replies = &runner.client.published;
        let (topic, payload) = published_json(replies, replies.len() - 1);
        assert_eq!(topic, "homebridge/to/set");
        assert_eq!(payload["characteristic"], "CurrentTemperature");
        assert_eq!(payload["value"], 23.5);
    }

    #[tokio::test]
    async fn test_unknown_target_state_parks_in_idle() {
        let (accessory, device) = accessory(false);
        let mut client = MockMqttClient::new();
        client.queue(
            "homebridge/from/set",
            serde_json::json!({
                "name": "Air Purifier",
                "service_name": "Air Purifier",
                "characteristic": "TargetAirPurifierState",
                "value": 7
            }),
        );

        let mut runner = BridgeRunner::new(client, vec![accessory], "homebridge".to_string());
        runner.run().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(device.mode(), crate::miio::DeviceMode::Idle);
    }

    #[tokio::test]
    async fn test_identify_is_acknowledged_without_effect() {
        let (accessory, device) = accessory(false);
        let mut client = MockMqttClient::new();
        client.queue(
            "homebridge/from/identify",
            serde_json::json!({ "name": "Air Purifier" }),
        );

        let mut runner = BridgeRunner::new(client, vec![accessory], "homebridge".to_string());
        runner.run().await.unwrap();

        assert!(!device.power());
        // Nothing beyond registration was published
        assert_eq!(runner.client.published.len(), 1);
    }
}
