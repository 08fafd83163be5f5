//! # mithermo-adapter-ble
//!
//! Bluetooth adapter for the Mi Beacon bridge, built on `btleplug`.
//!
//! ## How it works
//!
//! [`BtleplugTransport`] opens the first adapter of the host and forwards
//! its central events to the application: adapter state changes, and every
//! service-data advertisement together with a [`BtleplugPeripheral`]
//! handle. The polling engine later uses that handle to open GATT sessions
//! with encrypted sensors.
//!
//! | Event | Forwarded as |
//! |-------|--------------|
//! | `StateUpdate` | `TransportEvent::AdapterStateChanged` |
//! | `ServiceDataAdvertisement` | `TransportEvent::Discovered`, 16-bit UUIDs only |
//! | anything else | dropped |
//!
//! ## Dependency rule
//!
//! Depends on `mithermo-app` and `mithermo-domain`. Nothing depends on this
//! crate except the daemon binary.

mod config;
mod error;
mod gatt;
mod transport;

pub use config::BleConfig;
pub use error::BleError;
pub use gatt::BtleplugPeripheral;
pub use transport::BtleplugTransport;
