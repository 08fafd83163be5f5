//! # mithermo-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `BluetoothTransport` / `GattPeripheral`: scanning and GATT primitives
//!   - `DeviceNotifier`: "device added" / "property changed" notifications
//! - Own the **device registry** (one record per sensor, never evicted)
//! - Drive the **scan controller** (advertisement path) and the **polling
//!   engine** (encrypted path)
//! - Provide **in-process infrastructure** (notification bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `mithermo-domain` only (plus `tokio::sync` for channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod event_bus;
pub mod poll_cycle;
pub mod polling_engine;
pub mod ports;
pub mod registry;
pub mod scan_controller;

#[cfg(test)]
pub(crate) mod testing;
