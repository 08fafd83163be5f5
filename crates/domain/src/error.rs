//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors with `thiserror`; these are the
//! ones that only need domain knowledge.

use crate::id::DeviceId;

/// Why a service-data payload could not be turned into a beacon event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload ended before a field's declared length.
    #[error("payload truncated in {field}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Name of the field being read.
        field: &'static str,
        /// Bytes the field requires.
        needed: usize,
        /// Bytes left in the payload.
        available: usize,
    },

    /// The service-data entry is not a Mi Beacon (`0xFE95`) entry.
    #[error("unsupported service UUID 0x{0:04X}")]
    WrongService(u16),
}

/// Errors raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A reading was applied to an id that was never registered.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
}
