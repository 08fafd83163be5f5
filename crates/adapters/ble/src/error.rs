//! BLE adapter error types.

use mithermo_app::ports::TransportError;

/// Errors specific to the BLE adapter.
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    /// No BLE adapter found on the host.
    #[error("no BLE adapter available")]
    NotAvailable,

    /// A btleplug operation failed.
    #[error("bluetooth stack error")]
    Bluetooth(#[from] btleplug::Error),
}

impl From<BleError> for TransportError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::NotAvailable => Self::NotAvailable,
            BleError::Bluetooth(inner) => Self::Backend(Box::new(inner)),
        }
    }
}
