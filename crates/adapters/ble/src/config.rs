//! BLE adapter configuration.

use std::time::Duration;

use serde::Deserialize;

use mithermo_app::polling_engine::PollingConfig;

/// Timing settings for scanning and polling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Interval between two polling rounds of encrypted sensors, in milliseconds.
    pub poll_interval_ms: u64,
    /// Optional bound on every GATT step, in milliseconds.
    ///
    /// When unset, a hung connection is only abandoned when the Bluetooth
    /// stack gives up on it.
    pub gatt_timeout_ms: Option<u64>,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            gatt_timeout_ms: None,
        }
    }
}

impl BleConfig {
    /// Polling engine settings derived from this configuration.
    #[must_use]
    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            step_timeout: self.gatt_timeout_ms.map(Duration::from_millis),
        }
    }
}
