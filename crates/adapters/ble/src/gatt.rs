//! GATT sessions on btleplug peripherals.
//!
//! Wraps a [`btleplug::platform::Peripheral`] behind the application's
//! [`GattPeripheral`] port. Sequencing (connect, read, always disconnect)
//! lives in the application's poll cycle; this module only maps calls.

use btleplug::api::{Characteristic as NativeCharacteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use tokio_stream::StreamExt as _;

use mithermo_app::ports::{Characteristic, GattPeripheral, Notifications, TransportError};

use crate::error::BleError;

/// A peripheral handle retained between discovery and polling.
#[derive(Debug, Clone)]
pub struct BtleplugPeripheral {
    inner: Peripheral,
}

impl BtleplugPeripheral {
    pub(crate) fn new(inner: Peripheral) -> Self {
        Self { inner }
    }

    /// Find a GATT characteristic by UUID on a peripheral that has already
    /// discovered its services.
    fn find_characteristic(&self, uuid: uuid::Uuid) -> Result<NativeCharacteristic, TransportError> {
        self.inner
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound { uuid })
    }
}

impl GattPeripheral for BtleplugPeripheral {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await.map_err(BleError::from)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await.map_err(BleError::from)?;
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        uuids: &[uuid::Uuid],
    ) -> Result<Vec<Characteristic>, TransportError> {
        self.inner
            .discover_services()
            .await
            .map_err(BleError::from)?;
        uuids
            .iter()
            .map(|&uuid| {
                self.find_characteristic(uuid)
                    .map(|found| Characteristic { uuid: found.uuid })
            })
            .collect()
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>, TransportError> {
        let native = self.find_characteristic(characteristic.uuid)?;
        let value = self.inner.read(&native).await.map_err(BleError::from)?;
        Ok(value)
    }

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
    ) -> Result<Notifications, TransportError> {
        let native = self.find_characteristic(characteristic.uuid)?;
        // Open the stream first so the first notification cannot be missed.
        let stream = self.inner.notifications().await.map_err(BleError::from)?;
        self.inner
            .subscribe(&native)
            .await
            .map_err(BleError::from)?;

        let uuid = characteristic.uuid;
        Ok(Box::pin(
            stream
                .filter(move |notification| notification.uuid == uuid)
                .map(|notification| notification.value),
        ))
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), TransportError> {
        let native = self.find_characteristic(characteristic.uuid)?;
        self.inner
            .unsubscribe(&native)
            .await
            .map_err(BleError::from)?;
        Ok(())
    }
}
