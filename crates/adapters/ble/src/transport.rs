//! btleplug-backed [`BluetoothTransport`].
//!
//! Central events are forwarded from a background task into the
//! application's [`EventSubscription`]. Only service-data advertisements
//! and adapter state changes are forwarded.

use std::collections::HashMap;

use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio_stream::StreamExt as _;

use mithermo_app::ports::{
    AdapterState, BluetoothTransport, Discovery, EventSubscription, ServiceData, TransportError,
    TransportEvent,
};

use crate::error::BleError;
use crate::gatt::BtleplugPeripheral;

/// Buffered events between the btleplug stream and the scan controller.
const EVENT_CAPACITY: usize = 256;

/// Lower 96 bits shared by every 16-bit Bluetooth SIG UUID.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Transport over the first Bluetooth adapter of the host.
pub struct BtleplugTransport {
    central: Adapter,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter found on the host.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::NotAvailable`] when the host has no adapter, or
    /// [`BleError::Bluetooth`] when the Bluetooth stack cannot be reached.
    pub async fn connect() -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let central = adapters.into_iter().next().ok_or(BleError::NotAvailable)?;

        match central.adapter_info().await {
            Ok(info) => tracing::info!(adapter = %info, "bluetooth adapter opened"),
            Err(err) => tracing::debug!(%err, "bluetooth adapter opened without info"),
        }

        Ok(Self { central })
    }
}

impl BluetoothTransport for BtleplugTransport {
    type Peripheral = BtleplugPeripheral;

    async fn subscribe(&self) -> Result<EventSubscription<BtleplugPeripheral>, TransportError> {
        let mut events = self.central.events().await.map_err(BleError::from)?;
        let initial = self.central.adapter_state().await.map_err(BleError::from)?;

        let (sender, subscription) = EventSubscription::channel(EVENT_CAPACITY);
        let central = self.central.clone();
        tokio::spawn(async move {
            let initial = TransportEvent::AdapterStateChanged(adapter_state(initial));
            if sender.send(initial).await.is_err() {
                return;
            }
            while let Some(event) = events.next().await {
                let Some(event) = translate(&central, event).await else {
                    continue;
                };
                if sender.send(event).await.is_err() {
                    tracing::debug!("event subscription dropped");
                    break;
                }
            }
            tracing::debug!("btleplug event stream ended");
        });

        Ok(subscription)
    }

    async fn start_scanning(&self) -> Result<(), TransportError> {
        // Not every sensor lists 0xFE95 among its advertised services.
        self.central
            .start_scan(ScanFilter::default())
            .await
            .map_err(BleError::from)?;
        Ok(())
    }
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        CentralState::Unknown => AdapterState::Unknown,
    }
}

async fn translate(
    central: &Adapter,
    event: CentralEvent,
) -> Option<TransportEvent<BtleplugPeripheral>> {
    match event {
        CentralEvent::StateUpdate(state) => {
            Some(TransportEvent::AdapterStateChanged(adapter_state(state)))
        }
        CentralEvent::ServiceDataAdvertisement { id, service_data } => {
            let peripheral = match central.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(err) => {
                    tracing::trace!(%err, ?id, "advertising peripheral vanished");
                    return None;
                }
            };
            Some(TransportEvent::Discovered(Discovery {
                peripheral_id: peripheral_id(&id, &peripheral),
                service_data: short_service_data(service_data),
                peripheral: BtleplugPeripheral::new(peripheral),
            }))
        }
        _ => None,
    }
}

/// Stable identifier for a peripheral: its address as lowercase hex.
///
/// Some platforms hide the address and report it as all zeroes; the
/// platform id is used there instead.
fn peripheral_id(id: &PeripheralId, peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        return format!("{id:?}");
    }
    address_id(address.into_inner())
}

fn address_id(address: [u8; 6]) -> String {
    address.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Keep entries under 16-bit SIG UUIDs, ordered by UUID.
///
/// btleplug hands service data over as a `HashMap`, so the over-the-air
/// order is already lost. Sorting keeps the first entry stable between
/// advertisements, at the cost that a sensor also advertising a lower UUID
/// (such as the `0x181A` environmental service) never reaches the beacon
/// decoder.
fn short_service_data(service_data: HashMap<uuid::Uuid, Vec<u8>>) -> Vec<ServiceData> {
    let mut entries: Vec<_> = service_data
        .into_iter()
        .filter_map(|(uuid, data)| short_uuid(uuid).map(|uuid| ServiceData { uuid, data }))
        .collect();
    entries.sort_by_key(|entry| entry.uuid);
    entries
}

/// The 16-bit alias of `uuid`, if it is built on the Bluetooth base UUID.
fn short_uuid(uuid: uuid::Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & ((1 << 96) - 1) != BLUETOOTH_BASE_UUID {
        return None;
    }
    u16::try_from(value >> 96).ok()
}
