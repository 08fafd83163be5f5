//! Device registry, the single owner of every [`DeviceRecord`].
//!
//! Constructed once at startup and handed to the scan controller and the
//! polling engine as a cheaply clonable handle. Records are never evicted:
//! once seen, a device stays known for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mithermo_domain::device::{DeviceKind, DeviceRecord};
use mithermo_domain::error::RegistryError;
use mithermo_domain::id::DeviceId;
use mithermo_domain::measurement::{EncryptedReading, Measurement, PropertyValue};

#[derive(Default)]
struct Inner {
    records: HashMap<DeviceId, DeviceRecord>,
    /// Ids in insertion order.
    order: Vec<DeviceId>,
}

/// Shared handle over the set of known devices.
///
/// The lock is only held for the duration of a single call and never
/// across an await point.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the record for `id`, creating it when unknown.
    ///
    /// The kind is derived from `product_id` only at creation; later calls
    /// return the existing record whatever product id they pass. The flag
    /// is `true` when the record was created by this call.
    pub fn get_or_create(&self, id: &DeviceId, product_id: u16) -> (DeviceRecord, bool) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get(id) {
            return (record.clone(), false);
        }
        let record = DeviceRecord::new(id.clone(), product_id);
        inner.records.insert(id.clone(), record.clone());
        inner.order.push(id.clone());
        tracing::debug!(device = %id, kind = ?record.kind, product_id, "device registered");
        (record, true)
    }

    /// Merge an advertisement measurement into the record for `id`.
    ///
    /// Returns the properties present in `measurement`; absent fields keep
    /// their last known value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDevice`] when `id` was never registered.
    pub fn apply_open_reading(
        &self,
        id: &DeviceId,
        measurement: &Measurement,
    ) -> Result<Vec<PropertyValue>, RegistryError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownDevice(id.clone()))?;
        Ok(record.apply_measurement(measurement))
    }

    /// Merge the result of a GATT poll into the record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDevice`] when `id` was never registered.
    pub fn apply_encrypted_reading(
        &self,
        id: &DeviceId,
        reading: &EncryptedReading,
    ) -> Result<Vec<PropertyValue>, RegistryError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownDevice(id.clone()))?;
        Ok(record.apply_encrypted(reading))
    }

    /// Visit every encrypted record, in insertion order.
    ///
    /// `f` runs under the registry lock and must not call back into the
    /// registry.
    pub fn for_each_encrypted(&self, mut f: impl FnMut(&DeviceRecord)) {
        let inner = self.lock();
        let encrypted = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| record.kind == DeviceKind::Encrypted);
        for record in encrypted {
            f(record);
        }
    }

    /// Snapshot of a single record.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.lock().records.get(id).cloned()
    }

    /// Snapshot of every record, in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<DeviceRecord> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// `true` when no device has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}
