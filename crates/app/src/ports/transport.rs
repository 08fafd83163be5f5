//! Transport port: scanning and GATT primitives supplied by a Bluetooth stack.
//!
//! The application never talks to a radio directly. An adapter crate turns
//! its stack's events into [`TransportEvent`]s delivered through an
//! [`EventSubscription`], and exposes each discovered peripheral as a
//! [`GattPeripheral`] handle that the polling engine keeps for later
//! connections.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Boxed error from the underlying Bluetooth stack.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Stream of raw notification payloads for one characteristic.
pub type Notifications = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Power state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PoweredOn => "powered on",
            Self::PoweredOff => "powered off",
            Self::Unknown => "unknown",
        })
    }
}

/// One service-data entry of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceData {
    /// 16-bit service UUID.
    pub uuid: u16,
    pub data: Vec<u8>,
}

/// An advertisement burst from one peripheral.
///
/// Delivered once per advertisement, not deduplicated by the transport.
#[derive(Debug, Clone)]
pub struct Discovery<P> {
    /// Identifier derived from the peripheral's hardware address.
    pub peripheral_id: String,
    pub service_data: Vec<ServiceData>,
    /// Handle used later for GATT sessions.
    pub peripheral: P,
}

/// Events emitted by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent<P> {
    AdapterStateChanged(AdapterState),
    Discovered(Discovery<P>),
}

/// Subscription handle over the transport's event stream.
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct EventSubscription<P> {
    receiver: mpsc::Receiver<TransportEvent<P>>,
}

impl<P> EventSubscription<P> {
    /// Create a subscription and the sender the transport feeds it with.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<TransportEvent<P>>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self { receiver })
    }

    /// Wait for the next event; `None` once the transport has gone away.
    pub async fn next(&mut self) -> Option<TransportEvent<P>> {
        self.receiver.recv().await
    }
}

/// A GATT characteristic found on a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Characteristic {
    pub uuid: uuid::Uuid,
}

/// Errors reported by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No Bluetooth adapter found on the host.
    #[error("no Bluetooth adapter available")]
    NotAvailable,

    /// A required characteristic is missing from the peripheral.
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound {
        /// UUID that was looked for.
        uuid: uuid::Uuid,
    },

    /// The notification stream closed before delivering a value.
    #[error("notification stream ended before a value arrived")]
    NotificationStreamEnded,

    /// A payload read over GATT could not be decoded.
    #[error("malformed GATT payload")]
    MalformedPayload(#[source] mithermo_domain::error::DecodeError),

    /// An operation did not complete within the configured timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited on.
        operation: &'static str,
        /// The configured limit.
        after: Duration,
    },

    /// The Bluetooth stack reported an error.
    #[error("bluetooth stack error")]
    Backend(#[source] BackendError),
}

/// The local Bluetooth controller.
pub trait BluetoothTransport: Send + Sync {
    /// Handle type for discovered peripherals.
    type Peripheral: GattPeripheral;

    /// Subscribe to adapter-state and discovery events.
    ///
    /// The current adapter state should be delivered first when the
    /// implementation knows it.
    fn subscribe(
        &self,
    ) -> impl Future<Output = Result<EventSubscription<Self::Peripheral>, TransportError>> + Send;

    /// Start continuous scanning, reporting duplicate advertisements.
    fn start_scanning(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A peripheral that can be driven through a GATT session.
///
/// Handles are cheap to clone and remain valid between sessions.
pub trait GattPeripheral: Clone + Send + Sync + 'static {
    /// Connect and wait until the link is established.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the connection.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Discover services and return the characteristics matching `uuids`,
    /// in the same order.
    ///
    /// Missing characteristics are reported as
    /// [`TransportError::CharacteristicNotFound`].
    fn discover_characteristics(
        &self,
        uuids: &[uuid::Uuid],
    ) -> impl Future<Output = Result<Vec<Characteristic>, TransportError>> + Send;

    /// Read the current value of a characteristic.
    fn read(
        &self,
        characteristic: &Characteristic,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Enable notifications and return the stream of values for
    /// `characteristic`.
    fn subscribe(
        &self,
        characteristic: &Characteristic,
    ) -> impl Future<Output = Result<Notifications, TransportError>> + Send;

    /// Disable notifications.
    fn unsubscribe(
        &self,
        characteristic: &Characteristic,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
