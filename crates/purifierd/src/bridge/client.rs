use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::BridgeError;
use crate::config::BridgeConfig;

/// Message received from a subscribed topic
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Trait for the MQTT connection to the bridge.
///
/// Abstracted so the bridge runner can be driven by a mock in tests.
#[async_trait]
pub trait MqttClient: Send + Sync {
    async fn connect(&mut self) -> Result<(), BridgeError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError>;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;

    /// Next inbound message; None once the connection is gone
    async fn poll_message(&mut self) -> Option<MqttMessage>;
}

/// MQTT client backed by rumqttc
pub struct RumqttcClient {
    options: MqttOptions,
    client: Option<AsyncClient>,
    message_rx: Option<mpsc::UnboundedReceiver<MqttMessage>>,
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    pub fn new(config: &BridgeConfig) -> Self {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        Self {
            options,
            client: None,
            message_rx: None,
            event_loop_task: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, BridgeError> {
        self.client.as_ref().ok_or(BridgeError::NotConnected)
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), BridgeError> {
        let (client, mut event_loop) = AsyncClient::new(self.options.clone(), 10);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        };
                        // Receiver dropped means the client is gone
                        if message_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.message_rx = Some(message_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError> {
        self.client()?.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        match &mut self.message_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

/// Mock MQTT client for bridge runner tests
#[cfg(test)]
#[derive(Default)]
pub struct MockMqttClient {
    pub inbound: std::collections::VecDeque<MqttMessage>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub connected: bool,
}

#[cfg(test)]
impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, topic: &str, payload: serde_json::Value) {
        self.inbound.push_back(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_string().into_bytes(),
        });
    }
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<(), BridgeError> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        self.inbound.pop_front()
    }
}
