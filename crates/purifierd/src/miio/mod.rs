//! Seam to the miio device discovery/control library.
//!
//! purifierd never speaks the miio wire protocol itself. The [`DeviceBrowser`]
//! and [`Device`] traits are the boundary: browsers emit availability events
//! for devices on the LAN and open sessions, device handles expose the cached
//! properties and commands of an air purifier. The in-process simulator
//! ([`simulated`]) is the only built-in implementation.

mod device;
pub mod simulated;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

pub use device::Device;
pub use device::DeviceMode;

/// A device registration reported by the discovery mechanism
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    /// miio device identifier (e.g. "miio:04ab77f1")
    pub id: String,

    /// Hostname announced by the device
    pub hostname: String,

    /// IP address the device answered from
    pub address: IpAddr,

    /// UDP port of the device's control endpoint
    pub port: u16,

    /// Session token, when the device announces one. Discovery overwrites
    /// this with the configured token before opening a session.
    pub token: Option<String>,
}

/// Availability events emitted by a [`DeviceBrowser`]
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A device became reachable on the local network
    Available(DeviceRegistration),

    /// A previously reported device stopped responding
    Unavailable { id: String },
}

/// Trait for the device discovery/session side of the miio library.
///
/// Mirrors the browse/subscribe interface of the library: events arrive from
/// `poll_event` after `start`, and `connect` performs the token handshake
/// yielding a live [`Device`] handle.
#[async_trait]
pub trait DeviceBrowser: Send + Sync {
    /// Begin browsing for devices; events become available via `poll_event`
    async fn start(&mut self) -> Result<(), MiioError>;

    /// Next availability event, or None once the browser has stopped
    async fn poll_event(&mut self) -> Option<DeviceEvent>;

    /// Open a session with a registered device using its token
    async fn connect(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<Arc<dyn Device>, MiioError>;

    /// Stop browsing and drop any pending events
    async fn stop(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum MiioError {
    #[error("device browser has not been started")]
    NotStarted,

    #[error("device registration for {0} carries no token")]
    MissingToken(String),

    #[error("failed to open session with {id}: {reason}")]
    Connect { id: String, reason: String },

    #[error("device command failed: {0}")]
    Command(String),
}

/// Scripted browser for tests: yields a fixed sequence of events and hands
/// out pre-built device handles by registration id.
#[cfg(test)]
pub struct ScriptedBrowser {
    pub events: std::collections::VecDeque<DeviceEvent>,
    pub devices: std::collections::HashMap<String, Arc<dyn Device>>,
    /// Registration ids connect() should fail for
    pub refuse: Vec<String>,
    pub started: bool,
}

#[cfg(test)]
impl ScriptedBrowser {
    pub fn new(events: Vec<DeviceEvent>) -> Self {
        Self {
            events: events.into(),
            devices: std::collections::HashMap::new(),
            refuse: Vec::new(),
            started: false,
        }
    }

    pub fn with_device(mut self, id: &str, device: Arc<dyn Device>) -> Self {
        self.devices.insert(id.to_string(), device);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl DeviceBrowser for ScriptedBrowser {
    async fn start(&mut self) -> Result<(), MiioError> {
        self.started = true;
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<DeviceEvent> {
        self.events.pop_front()
    }

    async fn connect(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<Arc<dyn Device>, MiioError> {
        if registration.token.is_none() {
            return Err(MiioError::MissingToken(registration.id.clone()));
        }
        if self.refuse.contains(&registration.id) {
            return Err(MiioError::Connect {
                id: registration.id.clone(),
                reason: "handshake refused".to_string(),
            });
        }
        self.devices
            .get(&registration.id)
            .cloned()
            .ok_or_else(|| MiioError::Connect {
                id: registration.id.clone(),
                reason: "no such device".to_string(),
            })
    }

    async fn stop(&mut self) {
        self.started = false;
        self.events.clear();
    }
}
