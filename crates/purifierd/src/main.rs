use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use purifierd::accessory::AirPurifier;
use purifierd::bridge::{BridgeRunner, RumqttcClient};
use purifierd::config::{Config, DeviceBackend};
use purifierd::discovery::DiscoveryListener;
use purifierd::miio::simulated::{SimulatedBrowser, SimulatedDeviceSpec};
use purifierd::miio::DeviceBrowser;

#[derive(Parser)]
#[command(version, about = "HomeKit bridge daemon for Xiaomi Mi Air Purifiers")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "purifierd.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("purifierd starting");
    tracing::info!("Loaded config from: {}", args.config);

    let accessories: Vec<Arc<AirPurifier>> = config
        .accessories
        .iter()
        .cloned()
        .map(|accessory| Arc::new(AirPurifier::new(accessory)))
        .collect();

    for accessory in &accessories {
        tracing::info!(
            "Configured accessory '{}' for device {}",
            accessory.name(),
            accessory.device_id()
        );
    }

    let browser: Box<dyn DeviceBrowser> = match config.device.backend {
        DeviceBackend::Simulated => {
            let specs = accessories
                .iter()
                .map(|accessory| SimulatedDeviceSpec {
                    id: accessory.device_id().to_string(),
                    hostname: format!("{}.local", accessory.device_id().replace(':', "-")),
                })
                .collect();
            Box::new(SimulatedBrowser::new(specs))
        }
    };

    let mut listener = DiscoveryListener::new(accessories.clone());
    listener.start(browser).await?;

    #[cfg(feature = "api")]
    let api_shutdown = {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        if let Some(api) = config.api.as_ref().filter(|api| api.enabled) {
            let listen = api.listen.clone();
            let port = api.port;
            let accessories = accessories.clone();
            tokio::spawn(async move {
                if let Err(e) = purifierd::api::serve(listen, port, accessories, shutdown_rx).await
                {
                    tracing::error!("HTTP API server failed: {}", e);
                }
            });
        }
        shutdown_tx
    };

    let client = RumqttcClient::new(&config.bridge);
    let mut runner = BridgeRunner::new(client, accessories, config.bridge.base_topic.clone());

    tokio::select! {
        result = runner.run() => {
            if let Err(e) = result {
                tracing::error!("Bridge connection failed: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    listener.stop();

    #[cfg(feature = "api")]
    let _ = api_shutdown.send(());

    tracing::info!("purifierd shutdown complete");

    Ok(())
}
