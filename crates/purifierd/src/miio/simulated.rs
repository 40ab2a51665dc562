//! In-process device backend.
//!
//! Stands in for the real miio transport: simulated purifiers are announced
//! as available at start, accept sessions with any non-empty token, and apply
//! commands to in-memory state immediately. Used for running purifierd
//! without hardware and by the integration tests.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Device, DeviceBrowser, DeviceEvent, DeviceMode, DeviceRegistration, MiioError};

/// Description of one simulated purifier
#[derive(Debug, Clone)]
pub struct SimulatedDeviceSpec {
    pub id: String,
    pub hostname: String,
}

#[derive(Debug)]
struct SimulatedState {
    power: bool,
    mode: DeviceMode,
    favorite_level: u8,
    aqi: f64,
    temperature: f64,
    humidity: f64,
    destroyed: bool,
}

impl Default for SimulatedState {
    fn default() -> Self {
        Self {
            power: false,
            mode: DeviceMode::Auto,
            favorite_level: 0,
            aqi: 42.0,
            temperature: 21.5,
            humidity: 45.0,
            destroyed: false,
        }
    }
}

/// A simulated air purifier session
pub struct SimulatedDevice {
    id: String,
    address: IpAddr,
    port: u16,
    state: Mutex<SimulatedState>,
}

impl SimulatedDevice {
    pub fn new(id: String, address: IpAddr, port: u16) -> Self {
        Self {
            id,
            address,
            port,
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// Drive the sensor readings for a scenario
    pub fn set_readings(&self, aqi: f64, temperature: f64, humidity: f64) {
        let mut state = self.state.lock().expect("simulated state poisoned");
        state.aqi = aqi;
        state.temperature = temperature;
        state.humidity = humidity;
    }

    /// Whether `destroy` has been called on this handle
    pub fn destroyed(&self) -> bool {
        self.state.lock().expect("simulated state poisoned").destroyed
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> &str {
        "air-purifier"
    }

    fn address(&self) -> IpAddr {
        self.address
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn power(&self) -> bool {
        self.state.lock().expect("simulated state poisoned").power
    }

    fn mode(&self) -> DeviceMode {
        self.state.lock().expect("simulated state poisoned").mode
    }

    fn favorite_level(&self) -> u8 {
        self.state
            .lock()
            .expect("simulated state poisoned")
            .favorite_level
    }

    fn aqi(&self) -> f64 {
        self.state.lock().expect("simulated state poisoned").aqi
    }

    fn temperature(&self) -> f64 {
        self.state
            .lock()
            .expect("simulated state poisoned")
            .temperature
    }

    fn humidity(&self) -> f64 {
        self.state.lock().expect("simulated state poisoned").humidity
    }

    async fn set_power(&self, on: bool) -> Result<(), MiioError> {
        debug!("Simulated {}: set_power({})", self.id, on);
        self.state.lock().expect("simulated state poisoned").power = on;
        Ok(())
    }

    async fn set_mode(&self, mode: DeviceMode) -> Result<(), MiioError> {
        debug!("Simulated {}: set_mode({})", self.id, mode);
        self.state.lock().expect("simulated state poisoned").mode = mode;
        Ok(())
    }

    async fn set_favorite_level(&self, level: u8) -> Result<(), MiioError> {
        debug!("Simulated {}: set_favorite_level({})", self.id, level);
        self.state
            .lock()
            .expect("simulated state poisoned")
            .favorite_level = level;
        Ok(())
    }

    async fn destroy(&self) {
        debug!("Simulated {}: session destroyed", self.id);
        self.state.lock().expect("simulated state poisoned").destroyed = true;
    }
}

/// Browser over a fixed roster of simulated purifiers
pub struct SimulatedBrowser {
    devices: HashMap<String, Arc<SimulatedDevice>>,
    registrations: Vec<DeviceRegistration>,
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
    events_rx: mpsc::UnboundedReceiver<DeviceEvent>,
    started: bool,
}

impl SimulatedBrowser {
    pub fn new(specs: Vec<SimulatedDeviceSpec>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut devices = HashMap::new();
        let mut registrations = Vec::new();
        for (index, spec) in specs.into_iter().enumerate() {
            // One address per device in a private test range
            let address = IpAddr::V4(Ipv4Addr::new(192, 0, 2, (index + 1) as u8));
            let port = 54321;

            devices.insert(
                spec.id.clone(),
                Arc::new(SimulatedDevice::new(spec.id.clone(), address, port)),
            );
            registrations.push(DeviceRegistration {
                id: spec.id,
                hostname: spec.hostname,
                address,
                port,
                token: None,
            });
        }

        Self {
            devices,
            registrations,
            events_tx,
            events_rx,
            started: false,
        }
    }

    /// Handle to a simulated device, for scenario control
    pub fn device(&self, id: &str) -> Option<Arc<SimulatedDevice>> {
        self.devices.get(id).cloned()
    }

    /// Re-announce a device as available
    pub fn announce(&self, id: &str) {
        if let Some(registration) = self.registrations.iter().find(|r| r.id == id) {
            let _ = self
                .events_tx
                .send(DeviceEvent::Available(registration.clone()));
        }
    }

    /// Report a device as unavailable
    pub fn retract(&self, id: &str) {
        let _ = self.events_tx.send(DeviceEvent::Unavailable {
            id: id.to_string(),
        });
    }
}

#[async_trait]
impl DeviceBrowser for SimulatedBrowser {
    async fn start(&mut self) -> Result<(), MiioError> {
        self.started = true;
        for registration in &self.registrations {
            let _ = self
                .events_tx
                .send(DeviceEvent::Available(registration.clone()));
        }
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<DeviceEvent> {
        if !self.started {
            return None;
        }
        self.events_rx.recv().await
    }

    async fn connect(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<Arc<dyn Device>, MiioError> {
        if !self.started {
            return Err(MiioError::NotStarted);
        }

        match &registration.token {
            Some(token) if !token.is_empty() => {}
            _ => return Err(MiioError::MissingToken(registration.id.clone())),
        }

        self.devices
            .get(&registration.id)
            .map(|device| device.clone() as Arc<dyn Device>)
            .ok_or_else(|| MiioError::Connect {
                id: registration.id.clone(),
                reason: "unknown simulated device".to_string(),
            })
    }

    async fn stop(&mut self) {
        self.started = false;
        self.events_rx.close();
    }
}
