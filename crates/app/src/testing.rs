//! In-memory port implementations shared by the unit tests.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::poll_cycle::{BATTERY_CHARACTERISTIC, MEASUREMENT_CHARACTERISTIC};
use crate::ports::{
    BluetoothTransport, Characteristic, DeviceNotifier, EventSubscription, GattPeripheral,
    Notification, Notifications, NotifyError, TransportError, TransportEvent,
};

#[derive(Default)]
struct PeripheralState {
    calls: Vec<&'static str>,
    battery: u8,
    measurement: Vec<u8>,
    fail_connect: bool,
    hang_connect: bool,
    fail_battery: bool,
    missing_measurement: bool,
    no_notifications: bool,
}

/// Scriptable peripheral that records every GATT call.
#[derive(Clone, Default)]
pub struct FakePeripheral {
    state: Arc<Mutex<PeripheralState>>,
}

impl FakePeripheral {
    pub fn healthy(battery: u8, measurement: &[u8]) -> Self {
        let peripheral = Self::default();
        {
            let mut state = peripheral.state.lock().unwrap();
            state.battery = battery;
            state.measurement = measurement.to_vec();
        }
        peripheral
    }

    fn tweak(self, f: impl FnOnce(&mut PeripheralState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn failing_connect(self) -> Self {
        self.tweak(|s| s.fail_connect = true)
    }

    pub fn hanging_connect(self) -> Self {
        self.tweak(|s| s.hang_connect = true)
    }

    pub fn failing_battery_read(self) -> Self {
        self.tweak(|s| s.fail_battery = true)
    }

    pub fn without_measurement_characteristic(self) -> Self {
        self.tweak(|s| s.missing_measurement = true)
    }

    pub fn without_notifications(self) -> Self {
        self.tweak(|s| s.no_notifications = true)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn backend(message: &str) -> TransportError {
    TransportError::Backend(message.into())
}

impl GattPeripheral for FakePeripheral {
    async fn connect(&self) -> Result<(), TransportError> {
        self.record("connect");
        let (fail, hang) = {
            let state = self.state.lock().unwrap();
            (state.fail_connect, state.hang_connect)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(backend("connection refused"));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.record("disconnect");
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        uuids: &[uuid::Uuid],
    ) -> Result<Vec<Characteristic>, TransportError> {
        self.record("discover");
        let missing = self.state.lock().unwrap().missing_measurement;
        uuids
            .iter()
            .map(|&uuid| {
                if missing && uuid == MEASUREMENT_CHARACTERISTIC {
                    Err(TransportError::CharacteristicNotFound { uuid })
                } else {
                    Ok(Characteristic { uuid })
                }
            })
            .collect()
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>, TransportError> {
        self.record("read");
        assert_eq!(characteristic.uuid, BATTERY_CHARACTERISTIC);
        let state = self.state.lock().unwrap();
        if state.fail_battery {
            return Err(backend("read failed"));
        }
        Ok(vec![state.battery])
    }

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
    ) -> Result<Notifications, TransportError> {
        self.record("subscribe");
        assert_eq!(characteristic.uuid, MEASUREMENT_CHARACTERISTIC);
        let state = self.state.lock().unwrap();
        let values = if state.no_notifications {
            Vec::new()
        } else {
            vec![state.measurement.clone()]
        };
        Ok(Box::pin(tokio_stream::iter(values)))
    }

    async fn unsubscribe(&self, _characteristic: &Characteristic) -> Result<(), TransportError> {
        self.record("unsubscribe");
        Ok(())
    }
}

/// Notifier that keeps everything it is given.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock().unwrap())
    }
}

impl DeviceNotifier for RecordingNotifier {
    fn publish(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send {
        self.notifications.lock().unwrap().push(notification);
        async { Ok(()) }
    }
}

/// Transport whose events are pushed by the test.
#[derive(Clone, Default)]
pub struct FakeTransport {
    pending: Arc<Mutex<Option<EventSubscription<FakePeripheral>>>>,
    scans_started: Arc<Mutex<usize>>,
}

impl FakeTransport {
    /// Create the transport and the sender feeding its single subscription.
    pub fn new() -> (Self, mpsc::Sender<TransportEvent<FakePeripheral>>) {
        let (sender, subscription) = EventSubscription::channel(16);
        let transport = Self {
            pending: Arc::new(Mutex::new(Some(subscription))),
            scans_started: Arc::default(),
        };
        (transport, sender)
    }

    pub fn scans_started(&self) -> usize {
        *self.scans_started.lock().unwrap()
    }
}

impl BluetoothTransport for FakeTransport {
    type Peripheral = FakePeripheral;

    async fn subscribe(&self) -> Result<EventSubscription<FakePeripheral>, TransportError> {
        self.pending
            .lock()
            .unwrap()
            .take()
            .ok_or(TransportError::NotAvailable)
    }

    async fn start_scanning(&self) -> Result<(), TransportError> {
        *self.scans_started.lock().unwrap() += 1;
        Ok(())
    }
}
