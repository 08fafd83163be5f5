//! Scan controller: turns advertisements into registry updates.
//!
//! Consumes the transport's event stream, decodes Mi Beacon service data,
//! registers devices on first sighting and publishes their readings. New
//! encrypted devices are handed to the polling engine, since their
//! advertisements carry no usable measurement.

use tokio::sync::mpsc;

use mithermo_domain::device::DeviceKind;
use mithermo_domain::error::{DecodeError, RegistryError};
use mithermo_domain::id::DeviceId;
use mithermo_domain::measurement::PropertyChange;
use mithermo_domain::mibeacon::{self, BEACON_SERVICE_UUID};
use mithermo_domain::property::{DeviceDescription, PropertySchema};

use crate::polling_engine::PollRequest;
use crate::ports::{
    AdapterState, BluetoothTransport, DeviceNotifier, Discovery, Notification, NotifyError,
    ServiceData, TransportError, TransportEvent,
};
use crate::registry::DeviceRegistry;

/// Title used for devices when none is configured.
pub const DEFAULT_DISPLAY_NAME: &str = "Temperature Humidity Sensor";

/// Why a single advertisement was dropped.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The advertisement carried no service data at all.
    #[error("advertisement has no service data")]
    NoServiceData,

    /// The service data was not a valid Mi Beacon payload.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("registry rejected reading")]
    Registry(#[from] RegistryError),

    #[error("failed to publish notification")]
    Notify(#[from] NotifyError),

    /// The polling engine is no longer accepting requests.
    #[error("polling engine stopped")]
    PollingStopped,
}

/// Drives discovery and dispatches advertisements.
pub struct ScanController<T: BluetoothTransport, N> {
    transport: T,
    registry: DeviceRegistry,
    notifier: N,
    poll_requests: mpsc::UnboundedSender<PollRequest<T::Peripheral>>,
    display_name: String,
}

impl<T: BluetoothTransport, N: DeviceNotifier> ScanController<T, N> {
    /// Create a controller sharing `registry` with the polling engine.
    pub fn new(
        transport: T,
        registry: DeviceRegistry,
        notifier: N,
        poll_requests: mpsc::UnboundedSender<PollRequest<T::Peripheral>>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            registry,
            notifier,
            poll_requests,
            display_name: display_name.into(),
        }
    }

    /// Consume transport events until the transport goes away.
    ///
    /// Scanning starts whenever the adapter reports it is powered on.
    /// Failures while handling one advertisement never stop the loop.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when subscribing to the transport fails.
    pub async fn run(&self) -> Result<(), TransportError> {
        let mut events = self.transport.subscribe().await?;
        tracing::info!("scan controller started");

        while let Some(event) = events.next().await {
            match event {
                TransportEvent::AdapterStateChanged(AdapterState::PoweredOn) => {
                    match self.transport.start_scanning().await {
                        Ok(()) => tracing::info!("scanning for beacons"),
                        Err(err) => tracing::error!(%err, "failed to start scanning"),
                    }
                }
                TransportEvent::AdapterStateChanged(state) => {
                    tracing::info!(%state, "bluetooth adapter not ready");
                }
                TransportEvent::Discovered(discovery) => {
                    match self.handle_discovery(discovery).await {
                        Ok(()) => {}
                        Err(
                            err @ (ScanError::NoServiceData
                            | ScanError::Decode(DecodeError::WrongService(_))),
                        ) => tracing::trace!(%err, "advertisement ignored"),
                        Err(err @ ScanError::Decode(_)) => {
                            tracing::debug!(%err, "undecodable beacon payload");
                        }
                        Err(err) => tracing::warn!(%err, "failed to handle advertisement"),
                    }
                }
            }
        }

        tracing::info!("transport event stream ended");
        Ok(())
    }

    /// Handle a single advertisement.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] describing why the advertisement was dropped or
    /// only partially handled.
    #[tracing::instrument(skip_all, fields(peripheral = %discovery.peripheral_id))]
    pub async fn handle_discovery(
        &self,
        discovery: Discovery<T::Peripheral>,
    ) -> Result<(), ScanError> {
        let payload = beacon_payload(&discovery.service_data)?;
        let event = mibeacon::decode(payload)?;

        let id = DeviceId::new(discovery.peripheral_id);
        let (record, is_new) = self.registry.get_or_create(&id, event.product_id);

        if is_new {
            tracing::info!(
                device = %id,
                product_id = event.product_id,
                kind = ?record.kind,
                "new device"
            );
            self.notifier
                .publish(Notification::DeviceAdded(DeviceDescription::new(
                    &record,
                    &self.display_name,
                )))
                .await?;
        }

        match record.kind {
            DeviceKind::Open => {
                if let Some(measurement) = event.measurement {
                    let declared = PropertySchema::for_kind(record.kind);
                    let changed = self.registry.apply_open_reading(&id, &measurement)?;
                    for value in changed {
                        // The host only knows the properties announced for this kind.
                        if !declared.iter().any(|schema| schema.name == value.name()) {
                            tracing::trace!(property = value.name(), "undeclared property skipped");
                            continue;
                        }
                        self.notifier
                            .publish(Notification::PropertyChanged(PropertyChange {
                                device_id: id.clone(),
                                value,
                            }))
                            .await?;
                    }
                }
            }
            DeviceKind::Encrypted if is_new => {
                self.poll_requests
                    .send(PollRequest {
                        device_id: id,
                        peripheral: discovery.peripheral,
                    })
                    .map_err(|_| ScanError::PollingStopped)?;
            }
            DeviceKind::Encrypted => {}
        }

        Ok(())
    }

    /// Publish a device-added notification for every known device.
    ///
    /// Used when the host starts pairing and wants the full device list again.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when the host side is gone.
    pub async fn announce_known_devices(&self) -> Result<usize, NotifyError> {
        let records = self.registry.records();
        for record in &records {
            self.notifier
                .publish(Notification::DeviceAdded(DeviceDescription::new(
                    record,
                    &self.display_name,
                )))
                .await?;
        }
        Ok(records.len())
    }
}

/// Pick the Mi Beacon payload out of an advertisement's service data.
///
/// Only the first entry is considered.
fn beacon_payload(service_data: &[ServiceData]) -> Result<&[u8], ScanError> {
    match service_data.first() {
        None => Err(ScanError::NoServiceData),
        Some(entry) if entry.uuid != BEACON_SERVICE_UUID => {
            Err(DecodeError::WrongService(entry.uuid).into())
        }
        Some(entry) => Ok(&entry.data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::InProcessEventBus;
    use crate::testing::{FakePeripheral, FakeTransport, RecordingNotifier};
    use mithermo_domain::measurement::{Measurement, PropertyValue};
    use mithermo_domain::mibeacon::{BeaconEvent, FrameControl};

    const OPEN_PRODUCT: u16 = 0x01AA;
    const ENCRYPTED_PRODUCT: u16 = 0x055B;

    type Controller = ScanController<FakeTransport, RecordingNotifier>;

    fn controller() -> (
        Controller,
        DeviceRegistry,
        RecordingNotifier,
        mpsc::UnboundedReceiver<PollRequest<FakePeripheral>>,
    ) {
        let (transport, _events) = FakeTransport::new();
        controller_with(transport)
    }

    fn controller_with(
        transport: FakeTransport,
    ) -> (
        Controller,
        DeviceRegistry,
        RecordingNotifier,
        mpsc::UnboundedReceiver<PollRequest<FakePeripheral>>,
    ) {
        let registry = DeviceRegistry::new();
        let notifier = RecordingNotifier::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = ScanController::new(
            transport,
            registry.clone(),
            notifier.clone(),
            tx,
            DEFAULT_DISPLAY_NAME,
        );
        (controller, registry, notifier, rx)
    }

    fn beacon(product_id: u16, measurement: Option<Measurement>) -> Vec<u8> {
        let mut event = BeaconEvent::new(product_id, FrameControl::from_bits(0x2000), 7);
        if let Some(measurement) = measurement {
            event = event.with_measurement(measurement);
        }
        mibeacon::encode(&event)
    }

    fn discovery(id: &str, uuid: u16, data: Vec<u8>) -> Discovery<FakePeripheral> {
        Discovery {
            peripheral_id: id.to_owned(),
            service_data: vec![ServiceData { uuid, data }],
            peripheral: FakePeripheral::default(),
        }
    }

    fn combined() -> Measurement {
        Measurement::TemperatureAndHumidity {
            deci_degrees: 215,
            deci_percent: 480,
        }
    }

    #[tokio::test]
    async fn should_announce_device_before_publishing_readings() {
        let (controller, registry, notifier, _rx) = controller();

        controller
            .handle_discovery(discovery(
                "aa",
                BEACON_SERVICE_UUID,
                beacon(OPEN_PRODUCT, Some(combined())),
            ))
            .await
            .unwrap();

        let notifications = notifier.take();
        assert_eq!(notifications.len(), 3);
        let Notification::DeviceAdded(description) = &notifications[0] else {
            panic!("expected device added first, got {:?}", notifications[0]);
        };
        assert_eq!(description.id, "Temperature Humidity Sensor-aa");
        assert_eq!(
            notifications[1..],
            [
                Notification::PropertyChanged(PropertyChange {
                    device_id: DeviceId::from("aa"),
                    value: PropertyValue::Temperature(21.5),
                }),
                Notification::PropertyChanged(PropertyChange {
                    device_id: DeviceId::from("aa"),
                    value: PropertyValue::Humidity(48.0),
                }),
            ]
        );
        assert_eq!(
            registry.get(&DeviceId::from("aa")).unwrap().last_temperature_centi_deg,
            Some(2150)
        );
    }

    #[tokio::test]
    async fn should_announce_device_only_once() {
        let (controller, _registry, notifier, _rx) = controller();
        let payload = beacon(OPEN_PRODUCT, Some(Measurement::Battery { percent: 90 }));

        for _ in 0..3 {
            controller
                .handle_discovery(discovery("aa", BEACON_SERVICE_UUID, payload.clone()))
                .await
                .unwrap();
        }

        let added = notifier
            .take()
            .iter()
            .filter(|n| matches!(n, Notification::DeviceAdded(_)))
            .count();
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn should_ignore_other_service_uuids() {
        let (controller, registry, notifier, _rx) = controller();

        let err = controller
            .handle_discovery(discovery("aa", 0x181A, beacon(OPEN_PRODUCT, None)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScanError::Decode(DecodeError::WrongService(0x181A))
        ));
        assert!(registry.is_empty());
        assert!(notifier.take().is_empty());
    }

    #[tokio::test]
    async fn should_ignore_advertisement_without_service_data() {
        let (controller, registry, _notifier, _rx) = controller();
        let mut empty = discovery("aa", BEACON_SERVICE_UUID, Vec::new());
        empty.service_data.clear();

        let err = controller.handle_discovery(empty).await.unwrap_err();

        assert!(matches!(err, ScanError::NoServiceData));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn should_register_device_without_measurement() {
        let (controller, registry, notifier, _rx) = controller();

        controller
            .handle_discovery(discovery("aa", BEACON_SERVICE_UUID, beacon(OPEN_PRODUCT, None)))
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(notifier.take().len(), 1);
    }

    #[tokio::test]
    async fn should_request_poll_for_new_encrypted_device_after_announcing_it() {
        let (controller, registry, notifier, mut rx) = controller();
        let payload = beacon(ENCRYPTED_PRODUCT, None);

        controller
            .handle_discovery(discovery("enc", BEACON_SERVICE_UUID, payload.clone()))
            .await
            .unwrap();

        let notifications = notifier.take();
        assert!(matches!(
            notifications.as_slice(),
            [Notification::DeviceAdded(description)] if description.kind == DeviceKind::Encrypted
        ));
        let request = rx.try_recv().unwrap();
        assert_eq!(request.device_id, DeviceId::from("enc"));
        assert_eq!(registry.len(), 1);

        controller
            .handle_discovery(discovery("enc", BEACON_SERVICE_UUID, payload))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_report_stopped_polling_engine() {
        let (controller, _registry, _notifier, rx) = controller();
        drop(rx);

        let err = controller
            .handle_discovery(discovery(
                "enc",
                BEACON_SERVICE_UUID,
                beacon(ENCRYPTED_PRODUCT, None),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::PollingStopped));
    }

    #[tokio::test]
    async fn should_report_notifier_without_listeners() {
        let (transport, _events) = FakeTransport::new();
        let registry = DeviceRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let controller = ScanController::new(
            transport,
            registry.clone(),
            InProcessEventBus::new(4),
            tx,
            DEFAULT_DISPLAY_NAME,
        );

        let err = controller
            .handle_discovery(discovery(
                "aa",
                BEACON_SERVICE_UUID,
                beacon(OPEN_PRODUCT, Some(combined())),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Notify(NotifyError::Closed)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn should_announce_every_known_device() {
        let (controller, registry, notifier, _rx) = controller();
        registry.get_or_create(&DeviceId::from("a"), OPEN_PRODUCT);
        registry.get_or_create(&DeviceId::from("b"), ENCRYPTED_PRODUCT);

        let count = controller.announce_known_devices().await.unwrap();

        assert_eq!(count, 2);
        let ids: Vec<_> = notifier
            .take()
            .into_iter()
            .filter_map(|n| match n {
                Notification::DeviceAdded(description) => Some(description.device_id),
                Notification::PropertyChanged(_) => None,
            })
            .collect();
        assert_eq!(ids, vec![DeviceId::from("a"), DeviceId::from("b")]);
    }

    #[tokio::test]
    async fn should_start_scanning_and_survive_malformed_payloads() {
        let (transport, events) = FakeTransport::new();
        let (controller, registry, notifier, _rx) = controller_with(transport.clone());

        events
            .send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOff))
            .await
            .unwrap();
        events
            .send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .await
            .unwrap();
        events
            .send(TransportEvent::Discovered(discovery(
                "bad",
                BEACON_SERVICE_UUID,
                vec![0x50, 0x20],
            )))
            .await
            .unwrap();
        events
            .send(TransportEvent::Discovered(discovery(
                "good",
                BEACON_SERVICE_UUID,
                beacon(OPEN_PRODUCT, Some(Measurement::Battery { percent: 66 })),
            )))
            .await
            .unwrap();
        drop(events);

        controller.run().await.unwrap();

        assert_eq!(transport.scans_started(), 1);
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            notifier.take().as_slice(),
            [Notification::DeviceAdded(_)]
        ));
    }

    #[tokio::test]
    async fn should_not_publish_battery_for_open_device() {
        let (controller, registry, notifier, _rx) = controller();

        controller
            .handle_discovery(discovery(
                "aa",
                BEACON_SERVICE_UUID,
                beacon(OPEN_PRODUCT, Some(Measurement::Battery { percent: 66 })),
            ))
            .await
            .unwrap();
        controller
            .handle_discovery(discovery(
                "aa",
                BEACON_SERVICE_UUID,
                beacon(OPEN_PRODUCT, Some(Measurement::Temperature { centi_degrees: 2345 })),
            ))
            .await
            .unwrap();

        let notifications = notifier.take();
        let Notification::DeviceAdded(description) = &notifications[0] else {
            panic!("expected device added first, got {:?}", notifications[0]);
        };
        let names: Vec<_> = description.properties.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["temperature", "humidity"]);
        assert_eq!(
            notifications[1..],
            [Notification::PropertyChanged(PropertyChange {
                device_id: DeviceId::from("aa"),
                value: PropertyValue::Temperature(23.45),
            })]
        );
        assert_eq!(
            registry.get(&DeviceId::from("aa")).unwrap().last_battery_percent,
            Some(66)
        );
    }

    #[tokio::test]
    async fn should_fail_when_transport_cannot_be_subscribed() {
        let (transport, events) = FakeTransport::new();
        drop(events);
        let (controller, _registry, _notifier, _rx) = controller_with(transport.clone());
        controller.run().await.unwrap();

        let (second, _registry, _notifier, _rx) = controller_with(transport);
        let err = second.run().await.unwrap_err();
        assert!(matches!(err, TransportError::NotAvailable));
    }
}
