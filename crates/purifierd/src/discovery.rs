//! Availability listener binding discovered devices to accessories.
//!
//! One listener serves every configured accessory: it owns the shared
//! [`DeviceBrowser`], filters availability events by configured device id,
//! opens sessions, and attaches or detaches the live handle on the matching
//! accessory. There is no retry or backoff; a failed session open is logged
//! and dropped, and the device stays unbound until its next announcement.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::accessory::AirPurifier;
use crate::miio::{DeviceBrowser, DeviceEvent, DeviceRegistration, MiioError};

/// Device families this daemon knows how to drive
const SUPPORTED_DEVICE_TYPE: &str = "air-purifier";

pub struct DiscoveryListener {
    accessories: Vec<Arc<AirPurifier>>,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryListener {
    pub fn new(accessories: Vec<Arc<AirPurifier>>) -> Self {
        Self {
            accessories,
            task: None,
        }
    }

    /// Start browsing and spawn the event loop
    pub async fn start(&mut self, mut browser: Box<dyn DeviceBrowser>) -> Result<(), MiioError> {
        debug!("Discovering air purifier devices...");
        browser.start().await?;

        let accessories = self.accessories.clone();
        self.task = Some(tokio::spawn(async move {
            Self::run(browser, accessories).await;
        }));
        Ok(())
    }

    /// Stop the event loop; attached devices stay bound
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Consume availability events until the browser closes
    async fn run(mut browser: Box<dyn DeviceBrowser>, accessories: Vec<Arc<AirPurifier>>) {
        while let Some(event) = browser.poll_event().await {
            Self::handle_event(&*browser, &accessories, event).await;
        }
        debug!("Device browser closed, discovery loop exiting");
    }

    async fn handle_event(
        browser: &dyn DeviceBrowser,
        accessories: &[Arc<AirPurifier>],
        event: DeviceEvent,
    ) {
        match event {
            DeviceEvent::Available(registration) => {
                let accessory = match Self::accessory_for(accessories, &registration.id) {
                    Some(accessory) => accessory,
                    None => {
                        debug!("Ignoring unconfigured device {}", registration.id);
                        return;
                    }
                };
                Self::handle_available(browser, accessory, registration).await;
            }
            DeviceEvent::Unavailable { id } => {
                let accessory = match Self::accessory_for(accessories, &id) {
                    Some(accessory) => accessory,
                    None => return,
                };
                // No-op when nothing is attached
                if let Some(device) = accessory.detach() {
                    device.destroy().await;
                    debug!("Device {} unavailable, session released", id);
                }
            }
        }
    }

    async fn handle_available(
        browser: &dyn DeviceBrowser,
        accessory: &AirPurifier,
        mut registration: DeviceRegistration,
    ) {
        // The announcement never carries the session token; use the
        // configured one.
        registration.token = Some(accessory.device_token().to_string());

        let device = match browser.connect(&registration).await {
            Ok(device) => device,
            Err(e) => {
                // Dropped without retry; the next announcement tries again
                debug!("Failed to open session with {}: {}", registration.id, e);
                return;
            }
        };

        if device.device_type() != SUPPORTED_DEVICE_TYPE {
            debug!(
                "Device {} is a {}, not an air purifier; ignoring",
                registration.id,
                device.device_type()
            );
            return;
        }

        debug!(
            "Discovered '{}' (ID: {}) on {}:{}",
            registration.hostname,
            device.id(),
            device.address(),
            device.port()
        );
        accessory.attach(device);
    }

    fn accessory_for<'a>(
        accessories: &'a [Arc<AirPurifier>],
        device_id: &str,
    ) -> Option<&'a Arc<AirPurifier>> {
        accessories
            .iter()
            .find(|accessory| accessory.device_id() == device_id)
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        self.stop();
    }
}
