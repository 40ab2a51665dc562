use std::sync::{Arc, RwLock};

use tracing::debug;
use tracing::info;

use super::AccessoryError;
use crate::config::AccessoryConfig;
use crate::hap::{
    Active, AirQuality, Characteristic, CurrentAirPurifierState, Service, TargetAirPurifierState,
};
use crate::miio::{Device, DeviceMode};

/// Favorite-mode fan levels run 0-16
const FAVORITE_LEVEL_MAX: f64 = 16.0;

/// AQI thresholds, highest first; the first threshold the reading meets wins
const AQI_BANDS: [(f64, AirQuality); 5] = [
    (200.0, AirQuality::Poor),
    (150.0, AirQuality::Inferior),
    (100.0, AirQuality::Fair),
    (50.0, AirQuality::Good),
    (0.0, AirQuality::Excellent),
];

pub const MANUFACTURER: &str = "Xiaomi";
pub const MODEL: &str = "Air Purifier";

/// A service this accessory registers with the bridge
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub service: Service,
    pub service_name: String,
    pub characteristics: Vec<Characteristic>,
}

/// One HomeKit air-purifier accessory bound to a single configured device.
///
/// The device slot is the only mutable state: the discovery listener writes
/// it (one wholesale replacement per availability event) and every
/// characteristic handler reads it. Handlers never await the device's remote
/// confirmation; getters read the session's cached properties, setters hand
/// the command off and acknowledge immediately.
pub struct AirPurifier {
    config: AccessoryConfig,
    device: RwLock<Option<Arc<dyn Device>>>,
}

impl AirPurifier {
    pub fn new(config: AccessoryConfig) -> Self {
        Self {
            config,
            device: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    pub fn device_token(&self) -> &str {
        &self.config.device_token
    }

    /// Services this accessory registers with the bridge
    pub fn services(&self) -> Vec<ServiceDefinition> {
        let mut services = vec![ServiceDefinition {
            service: Service::AirPurifier,
            service_name: self.config.name.clone(),
            characteristics: vec![
                Characteristic::Active,
                Characteristic::RotationSpeed,
                Characteristic::TargetAirPurifierState,
                Characteristic::CurrentAirPurifierState,
            ],
        }];

        if self.config.show_air_quality {
            services.push(ServiceDefinition {
                service: Service::AirQualitySensor,
                service_name: "Air Quality Sensor".to_string(),
                characteristics: vec![Characteristic::AirQuality],
            });
        }

        if self.config.show_temperature {
            services.push(ServiceDefinition {
                service: Service::TemperatureSensor,
                service_name: "Temperature".to_string(),
                characteristics: vec![Characteristic::CurrentTemperature],
            });
        }

        if self.config.show_humidity {
            services.push(ServiceDefinition {
                service: Service::HumiditySensor,
                service_name: "Humidity".to_string(),
                characteristics: vec![Characteristic::CurrentRelativeHumidity],
            });
        }

        services
    }

    /// Store a freshly opened device handle
    pub fn attach(&self, device: Arc<dyn Device>) {
        info!(
            "Accessory '{}' bound to device {} at {}:{}",
            self.config.name,
            device.id(),
            device.address(),
            device.port()
        );
        *self.device.write().expect("device slot poisoned") = Some(device);
    }

    /// Clear the device slot, returning the handle for release
    pub fn detach(&self) -> Option<Arc<dyn Device>> {
        self.device.write().expect("device slot poisoned").take()
    }

    pub fn device(&self) -> Option<Arc<dyn Device>> {
        self.device.read().expect("device slot poisoned").clone()
    }

    pub fn is_attached(&self) -> bool {
        self.device.read().expect("device slot poisoned").is_some()
    }

    fn require_device(&self) -> Result<Arc<dyn Device>, AccessoryError> {
        self.device()
            .ok_or_else(|| AccessoryError::NoDevice(self.config.name.clone()))
    }

    pub fn power_state(&self) -> Active {
        match self.device() {
            Some(device) if device.power() => Active::Active,
            _ => Active::Inactive,
        }
    }

    pub async fn set_power_state(&self, state: Active) -> Result<(), AccessoryError> {
        let device = self.require_device()?;
        let name = self.config.name.clone();
        let on = state == Active::Active;
        // Acknowledged before the command resolves
        tokio::spawn(async move {
            if let Err(e) = device.set_power(on).await {
                debug!("set_power on '{}' failed: {}", name, e);
            }
        });
        Ok(())
    }

    pub fn mode(&self) -> TargetAirPurifierState {
        match self.device() {
            Some(device) => match device.mode() {
                DeviceMode::Favorite => TargetAirPurifierState::Manual,
                _ => TargetAirPurifierState::Auto,
            },
            None => TargetAirPurifierState::Auto,
        }
    }

    /// Set the target purifier state. `None` stands for a target state this
    /// accessory does not recognize; those park the device in idle mode.
    pub async fn set_mode(
        &self,
        state: Option<TargetAirPurifierState>,
    ) -> Result<(), AccessoryError> {
        let device = self.require_device()?;
        let mode = match state {
            Some(TargetAirPurifierState::Auto) => DeviceMode::Auto,
            Some(TargetAirPurifierState::Manual) => DeviceMode::Favorite,
            None => DeviceMode::Idle,
        };
        let name = self.config.name.clone();
        tokio::spawn(async move {
            if let Err(e) = device.set_mode(mode).await {
                debug!("set_mode on '{}' failed: {}", name, e);
            }
        });
        Ok(())
    }

    pub fn rotation_speed(&self) -> f64 {
        let device = match self.device() {
            Some(device) if device.power() => device,
            // Disconnected or turned off
            _ => return 0.0,
        };

        // At least 1 while the device is working. Note the `min` caps the
        // 0-100 scaled value at 1, so any non-zero level reads back as 1.
        let speed = f64::min(
            1.0,
            device.favorite_level() as f64 / FAVORITE_LEVEL_MAX * 100.0,
        );
        debug!("Rotation speed for '{}': {}", self.config.name, speed);
        speed
    }

    pub async fn set_rotation_speed(&self, speed: f64) -> Result<(), AccessoryError> {
        let device = self.require_device()?;

        // 17 levels, 0-16
        let level = (speed / 100.0 * FAVORITE_LEVEL_MAX).round() as u8;
        debug!("Set favorite level on '{}': {}", self.config.name, level);
        let name = self.config.name.clone();
        tokio::spawn(async move {
            if let Err(e) = device.set_favorite_level(level).await {
                debug!("set_favorite_level on '{}' failed: {}", name, e);
            }
        });
        Ok(())
    }

    pub fn air_quality(&self) -> AirQuality {
        let device = match self.device() {
            Some(device) => device,
            None => return AirQuality::Unknown,
        };

        let aqi = device.aqi();
        for (threshold, quality) in AQI_BANDS {
            if aqi >= threshold {
                return quality;
            }
        }
        AirQuality::Unknown
    }

    pub fn current_temperature(&self) -> f64 {
        self.device().map_or(0.0, |device| device.temperature())
    }

    pub fn current_relative_humidity(&self) -> f64 {
        self.device().map_or(0.0, |device| device.humidity())
    }

    /// Current purifier state. The device reports no state that maps onto
    /// Idle, so a powered-on device reads as PurifyingAir (or Inactive when
    /// `assume_purifying` is off) and Idle is never produced.
    pub fn current_state(&self) -> CurrentAirPurifierState {
        match self.device() {
            Some(device) if device.power() => {
                if self.config.assume_purifying {
                    CurrentAirPurifierState::PurifyingAir
                } else {
                    CurrentAirPurifierState::Inactive
                }
            }
            _ => CurrentAirPurifierState::Inactive,
        }
    }

    /// Identify request from the bridge; the device has no locate action
    pub fn identify(&self) {
        info!("Identify requested for '{}'", self.config.name);
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use async_trait::async_trait;

    use super::*;
    use crate::miio::simulated::SimulatedDevice;
    use crate::miio::MiioError;

    fn test_config() -> AccessoryConfig {
        AccessoryConfig {
            name: "Air Purifier".to_string(),
            device_id: "miio:04ab77f1".to_string(),
            device_token: "00112233445566778899aabbccddeeff".to_string(),
            show_air_quality: false,
            show_temperature: false,
            show_humidity: false,
            assume_purifying: true,
        }
    }

    fn attached() -> (AirPurifier, Arc<SimulatedDevice>) {
        let accessory = AirPurifier::new(test_config());
        let device = Arc::new(SimulatedDevice::new(
            "miio:04ab77f1".to_string(),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            54321,
        ));
        accessory.attach(device.clone());
        (accessory, device)
    }

    /// Device whose commands always fail
    struct BrokenDevice;

    #[async_trait]
    impl Device for BrokenDevice {
        fn id(&self) -> &str {
            "miio:broken"
        }
        fn device_type(&self) -> &str {
            "air-purifier"
        }
        fn address(&self) -> IpAddr {
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9))
        }
        fn port(&self) -> u16 {
            54321
        }
        fn power(&self) -> bool {
            true
        }
        fn mode(&self) -> DeviceMode {
            DeviceMode::Auto
        }
        fn favorite_level(&self) -> u8 {
            8
        }
        fn aqi(&self) -> f64 {
            10.0
        }
        fn temperature(&self) -> f64 {
            21.0
        }
        fn humidity(&self) -> f64 {
            40.0
        }
        async fn set_power(&self, _on: bool) -> Result<(), MiioError> {
            Err(MiioError::Command("unreachable".to_string()))
        }
        async fn set_mode(&self, _mode: DeviceMode) -> Result<(), MiioError> {
            Err(MiioError::Command("unreachable".to_string()))
        }
        async fn set_favorite_level(&self, _level: u8) -> Result<(), MiioError> {
            Err(MiioError::Command("unreachable".to_string()))
        }
        async fn destroy(&self) {}
    }

    /// Device whose commands never resolve, like a purifier that dropped off
    /// the network mid-session
    struct HungDevice;

    #[async_trait]
    impl Device for HungDevice {
        fn id(&self) -> &str {
            "miio:hung"
        }
        fn device_type(&self) -> &str {
            "air-purifier"
        }
        fn address(&self) -> IpAddr {
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))
        }
        fn port(&self) -> u16 {
            54321
        }
        fn power(&self) -> bool {
            true
        }
        fn mode(&self) -> DeviceMode {
            DeviceMode::Auto
        }
        fn favorite_level(&self) -> u8 {
            0
        }
        fn aqi(&self) -> f64 {
            0.0
        }
        fn temperature(&self) -> f64 {
            0.0
        }
        fn humidity(&self) -> f64 {
            0.0
        }
        async fn set_power(&self, _on: bool) -> Result<(), MiioError> {
            std::future::pending().await
        }
        async fn set_mode(&self, _mode: DeviceMode) -> Result<(), MiioError> {
            std::future::pending().await
        }
        async fn set_favorite_level(&self, _level: u8) -> Result<(), MiioError> {
            std::future::pending().await
        }
        async fn destroy(&self) {}
    }

    #[test]
    fn test_defaults_with_no_device() {
        let accessory = AirPurifier::new(test_config());

        assert_eq!(accessory.power_state(), Active::Inactive);
        assert_eq!(accessory.mode(), TargetAirPurifierState::Auto);
        assert_eq!(accessory.rotation_speed(), 0.0);
        assert_eq!(accessory.air_quality(), AirQuality::Unknown);
        assert_eq!(accessory.current_temperature(), 0.0);
        assert_eq!(accessory.current_relative_humidity(), 0.0);
        assert_eq!(
            accessory.current_state(),
            CurrentAirPurifierState::Inactive
        );
    }

    #[test]
    fn test_getters_idempotent() {
        let (accessory, device) = attached();
        device.set_readings(120.0, 23.5, 55.0);

        assert_eq!(accessory.air_quality(), accessory.air_quality());
        assert_eq!(
            accessory.current_temperature(),
            accessory.current_temperature()
        );
        assert_eq!(accessory.power_state(), accessory.power_state());
    }

    #[tokio::test]
    async fn test_setters_require_device() {
        let accessory = AirPurifier::new(test_config());

        assert!(matches!(
            accessory.set_power_state(Active::Active).await,
            Err(AccessoryError::NoDevice(_))
        ));
        assert!(matches!(
            accessory.set_mode(Some(TargetAirPurifierState::Auto)).await,
            Err(AccessoryError::NoDevice(_))
        ));
        assert!(matches!(
            accessory.set_rotation_speed(50.0).await,
            Err(AccessoryError::NoDevice(_))
        ));
    }

    /// Let spawned device commands run on the test runtime
    async fn settle() {
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_set_power_state() {
        let (accessory, device) = attached();

        accessory.set_power_state(Active::Active).await.unwrap();
        settle().await;
        assert!(device.power());
        assert_eq!(accessory.power_state(), Active::Active);

        accessory.set_power_state(Active::Inactive).await.unwrap();
        settle().await;
        assert!(!device.power());
    }

    #[tokio::test]
    async fn test_mode_mapping() {
        let (accessory, device) = attached();

        accessory
            .set_mode(Some(TargetAirPurifierState::Manual))
            .await
            .unwrap();
        settle().await;
        assert_eq!(device.mode(), DeviceMode::Favorite);
        assert_eq!(accessory.mode(), TargetAirPurifierState::Manual);

        accessory
            .set_mode(Some(TargetAirPurifierState::Auto))
            .await
            .unwrap();
        settle().await;
        assert_eq!(device.mode(), DeviceMode::Auto);
        assert_eq!(accessory.mode(), TargetAirPurifierState::Auto);

        // Unrecognized target states park the device in idle
        accessory.set_mode(None).await.unwrap();
        settle().await;
        assert_eq!(device.mode(), DeviceMode::Idle);
        assert_eq!(accessory.mode(), TargetAirPurifierState::Auto);
    }

    #[tokio::test]
    async fn test_rotation_speed_levels() {
        let (accessory, device) = attached();

        for (speed, level) in [(0.0, 0), (50.0, 8), (100.0, 16), (33.0, 5), (72.0, 12)] {
            accessory.set_rotation_speed(speed).await.unwrap();
            settle().await;
            assert_eq!(device.favorite_level(), level, "speed {}", speed);
        }
    }

    #[tokio::test]
    async fn test_rotation_speed_read() {
        let (accessory, device) = attached();

        // Powered off reads zero regardless of level
        device.set_favorite_level(8).await.unwrap();
        assert_eq!(accessory.rotation_speed(), 0.0);

        device.set_power(true).await.unwrap();
        assert_eq!(accessory.rotation_speed(), 1.0);

        device.set_favorite_level(0).await.unwrap();
        assert_eq!(accessory.rotation_speed(), 0.0);
    }

    #[test]
    fn test_air_quality_bands() {
        let (accessory, device) = attached();

        for (aqi, expected) in [
            (250.0, AirQuality::Poor),
            (200.0, AirQuality::Poor),
            (175.0, AirQuality::Inferior),
            (150.0, AirQuality::Inferior),
            (120.0, AirQuality::Fair),
            (100.0, AirQuality::Fair),
            (75.0, AirQuality::Good),
            (50.0, AirQuality::Good),
            (25.0, AirQuality::Excellent),
            (0.0, AirQuality::Excellent),
        ] {
            device.set_readings(aqi, 21.0, 40.0);
            assert_eq!(accessory.air_quality(), expected, "aqi {}", aqi);
        }

        // A reading below every band threshold stays unknown
        device.set_readings(-1.0, 21.0, 40.0);
        assert_eq!(accessory.air_quality(), AirQuality::Unknown);
    }

    #[test]
    fn test_sensor_passthrough() {
        let (accessory, device) = attached();
        device.set_readings(42.0, 23.5, 55.0);

        assert_eq!(accessory.current_temperature(), 23.5);
        assert_eq!(accessory.current_relative_humidity(), 55.0);
    }

    #[tokio::test]
    async fn test_current_state_stub() {
        let (accessory, device) = attached();
        assert_eq!(
            accessory.current_state(),
            CurrentAirPurifierState::Inactive
        );

        device.set_power(true).await.unwrap();
        assert_eq!(
            accessory.current_state(),
            CurrentAirPurifierState::PurifyingAir
        );

        let mut config = test_config();
        config.assume_purifying = false;
        let muted = AirPurifier::new(config);
        muted.attach(device.clone());
        assert_eq!(muted.current_state(), CurrentAirPurifierState::Inactive);
    }

    #[tokio::test]
    async fn test_command_failure_still_acknowledged() {
        let accessory = AirPurifier::new(test_config());
        accessory.attach(Arc::new(BrokenDevice));

        // Remote failures are not surfaced to the caller
        accessory.set_power_state(Active::Active).await.unwrap();
        accessory.set_rotation_speed(50.0).await.unwrap();
        accessory
            .set_mode(Some(TargetAirPurifierState::Manual))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_setters_acknowledge_while_command_hangs() {
        let accessory = AirPurifier::new(test_config());
        accessory.attach(Arc::new(HungDevice));

        // The command never resolves; the acknowledgement must not wait on it
        tokio::time::timeout(std::time::Duration::from_millis(200), async {
            accessory.set_power_state(Active::Active).await.unwrap();
            accessory.set_rotation_speed(50.0).await.unwrap();
            accessory
                .set_mode(Some(TargetAirPurifierState::Manual))
                .await
                .unwrap();
        })
        .await
        .expect("setters must acknowledge without awaiting the device command");
    }

    #[test]
    fn test_services_follow_flags() {
        let mut config = test_config();
        config.show_air_quality = true;
        config.show_humidity = true;
        let accessory = AirPurifier::new(config);

        let services = accessory.services();
        assert_eq!(services.len(), 3);
        assert_eq!(services[0].service, Service::AirPurifier);
        assert_eq!(services[0].characteristics.len(), 4);
        assert_eq!(services[1].service, Service::AirQualitySensor);
        assert_eq!(services[2].service, Service::HumiditySensor);
    }
}
