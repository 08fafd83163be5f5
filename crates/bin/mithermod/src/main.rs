//! # mithermod: Mi Beacon bridge daemon
//!
//! Composition root that wires the Bluetooth adapter to the application
//! services and runs them until interrupted.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialise `tracing` with the configured filter
//! - Open the host's Bluetooth adapter
//! - Construct the device registry and notification bus
//! - Spawn the polling engine and drive the scan controller
//! - Log every notification as a JSON line
//! - Re-announce known devices on `SIGHUP` (pairing request)
//! - Handle graceful shutdown (SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use mithermo_adapter_ble::BtleplugTransport;
use mithermo_app::event_bus::InProcessEventBus;
use mithermo_app::polling_engine::PollingEngine;
use mithermo_app::ports::{BluetoothTransport, DeviceNotifier, Notification};
use mithermo_app::registry::DeviceRegistry;
use mithermo_app::scan_controller::ScanController;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let filter =
        EnvFilter::try_new(&config.logging.filter).context("invalid logging filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let transport = BtleplugTransport::connect()
        .await
        .context("failed to open a bluetooth adapter")?;

    // Shared state
    let registry = DeviceRegistry::new();
    let bus = Arc::new(InProcessEventBus::new(256));
    let logger = tokio::spawn(log_notifications(bus.subscribe()));

    // Polling engine
    let (poll_tx, poll_rx) = mpsc::unbounded_channel();
    let engine = PollingEngine::new(registry.clone(), Arc::clone(&bus), config.ble.polling());
    let polling = tokio::spawn(engine.run(poll_rx));

    // Scan controller
    let controller = ScanController::new(
        transport,
        registry,
        bus,
        poll_tx,
        config.device.display_name.clone(),
    );

    tokio::select! {
        result = controller.run() => result.context("bluetooth transport failed")?,
        result = pairing_requests(&controller) => result.context("failed to listen for SIGHUP")?,
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("shutting down");
        }
    }

    polling.abort();
    logger.abort();
    Ok(())
}

/// Write every notification to the log as a JSON line.
async fn log_notifications(mut notifications: broadcast::Receiver<Notification>) {
    loop {
        match notifications.recv().await {
            Ok(notification) => match serde_json::to_string(&notification) {
                Ok(json) => tracing::info!(target: "mithermod::notification", "{json}"),
                Err(err) => tracing::warn!(%err, "failed to serialise notification"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Re-announce every known device each time the process receives `SIGHUP`.
#[cfg(unix)]
async fn pairing_requests<T, N>(controller: &ScanController<T, N>) -> std::io::Result<()>
where
    T: BluetoothTransport,
    N: DeviceNotifier,
{
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    while hangup.recv().await.is_some() {
        match controller.announce_known_devices().await {
            Ok(count) => tracing::info!(count, "known devices announced"),
            Err(err) => tracing::warn!(%err, "failed to announce known devices"),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn pairing_requests<T, N>(_controller: &ScanController<T, N>) -> std::io::Result<()>
where
    T: BluetoothTransport,
    N: DeviceNotifier,
{
    std::future::pending().await
}
