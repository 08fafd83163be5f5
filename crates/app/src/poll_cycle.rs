//! One GATT poll cycle against an encrypted sensor.
//!
//! ```text
//! Idle → Connecting → DiscoveringCharacteristics
//!      → Reading (battery ∥ measurement) → Disconnecting → Idle
//! ```
//!
//! Every state after a successful connect runs inside
//! [`PollCycle::run_connected`], and [`PollCycle::run`] always disconnects
//! once it returns, whatever the outcome.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_stream::StreamExt as _;

use mithermo_domain::error::DecodeError;
use mithermo_domain::measurement::{EncryptedReading, GattMeasurement};

use crate::ports::{Characteristic, GattPeripheral, TransportError};

/// Standard GATT battery level characteristic (`0x2A19`).
pub const BATTERY_CHARACTERISTIC: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_2A19_0000_1000_8000_0080_5F9B_34FB);

/// Proprietary temperature/humidity notification characteristic.
pub const MEASUREMENT_CHARACTERISTIC: uuid::Uuid =
    uuid::Uuid::from_u128(0xEBE0_CCC1_7A0A_4B0C_8A1A_6FF2_997D_A3A6);

/// States of a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStage {
    Idle,
    Connecting,
    DiscoveringCharacteristics,
    /// Battery and measurement requests in flight together.
    Reading,
    ReadingBattery,
    ReadingMeasurement,
    Disconnecting,
}

impl fmt::Display for PollStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::DiscoveringCharacteristics => "discovering characteristics",
            Self::Reading => "reading",
            Self::ReadingBattery => "reading battery",
            Self::ReadingMeasurement => "reading measurement",
            Self::Disconnecting => "disconnecting",
        })
    }
}

/// A transport failure tagged with the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("poll failed while {stage}")]
pub struct PollError {
    pub stage: PollStage,
    #[source]
    pub source: TransportError,
}

impl PollError {
    fn at(stage: PollStage) -> impl FnOnce(TransportError) -> Self {
        move |source| Self { stage, source }
    }
}

/// Result of a cycle that got as far as reading.
#[derive(Debug)]
pub struct PollOutcome {
    /// Fields that were read successfully.
    pub reading: EncryptedReading,
    /// Reads that failed; the other read may still have succeeded.
    pub failures: Vec<PollError>,
}

/// Drives one connect → discover → read → disconnect sequence.
pub struct PollCycle<'a, P> {
    peripheral: &'a P,
    stage: PollStage,
    step_timeout: Option<Duration>,
}

impl<'a, P: GattPeripheral> PollCycle<'a, P> {
    /// Prepare a cycle against `peripheral`.
    ///
    /// When `step_timeout` is set, every transport call and the wait for the
    /// measurement notification is bounded by it.
    #[must_use]
    pub fn new(peripheral: &'a P, step_timeout: Option<Duration>) -> Self {
        Self {
            peripheral,
            stage: PollStage::Idle,
            step_timeout,
        }
    }

    fn advance(&mut self, next: PollStage) {
        tracing::trace!(from = %self.stage, to = %next, "poll cycle transition");
        self.stage = next;
    }

    /// Run the cycle to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`PollError`] when connecting or discovering characteristics
    /// fails. Read failures are reported in [`PollOutcome::failures`].
    pub async fn run(mut self) -> Result<PollOutcome, PollError> {
        self.advance(PollStage::Connecting);
        timed(self.step_timeout, "connect", self.peripheral.connect())
            .await
            .map_err(PollError::at(PollStage::Connecting))?;

        let result = self.run_connected().await;

        self.advance(PollStage::Disconnecting);
        if let Err(err) = timed(self.step_timeout, "disconnect", self.peripheral.disconnect()).await
        {
            tracing::warn!(%err, "failed to disconnect peripheral");
        }
        self.advance(PollStage::Idle);

        result
    }

    /// States that require a live connection.
    async fn run_connected(&mut self) -> Result<PollOutcome, PollError> {
        self.advance(PollStage::DiscoveringCharacteristics);
        let characteristics = timed(
            self.step_timeout,
            "characteristic discovery",
            self.peripheral
                .discover_characteristics(&[BATTERY_CHARACTERISTIC, MEASUREMENT_CHARACTERISTIC]),
        )
        .await
        .map_err(PollError::at(PollStage::DiscoveringCharacteristics))?;

        let &[battery, measurement] = characteristics.as_slice() else {
            let found: Vec<_> = characteristics.iter().map(|c| c.uuid).collect();
            let uuid = [BATTERY_CHARACTERISTIC, MEASUREMENT_CHARACTERISTIC]
                .into_iter()
                .find(|uuid| !found.contains(uuid))
                .unwrap_or(MEASUREMENT_CHARACTERISTIC);
            return Err(PollError {
                stage: PollStage::DiscoveringCharacteristics,
                source: TransportError::CharacteristicNotFound { uuid },
            });
        };

        self.advance(PollStage::Reading);
        let (battery, measurement) = tokio::join!(
            self.read_battery(&battery),
            self.read_measurement(&measurement)
        );

        let mut failures = Vec::new();
        let battery_percent = battery.map_err(|err| failures.push(err)).ok();
        let mut reading = measurement
            .map(EncryptedReading::from)
            .unwrap_or_else(|err| {
                failures.push(err);
                EncryptedReading::default()
            });
        reading.battery_percent = battery_percent;

        Ok(PollOutcome { reading, failures })
    }

    async fn read_battery(&self, characteristic: &Characteristic) -> Result<u8, PollError> {
        let at = PollError::at(PollStage::ReadingBattery);
        let value = timed(
            self.step_timeout,
            "battery read",
            self.peripheral.read(characteristic),
        )
        .await
        .map_err(at)?;

        value.first().copied().ok_or_else(|| PollError {
            stage: PollStage::ReadingBattery,
            source: TransportError::MalformedPayload(DecodeError::Truncated {
                field: "battery",
                needed: 1,
                available: 0,
            }),
        })
    }

    /// Subscribe, take exactly one notification, unsubscribe.
    async fn read_measurement(
        &self,
        characteristic: &Characteristic,
    ) -> Result<GattMeasurement, PollError> {
        let mut notifications = timed(
            self.step_timeout,
            "subscribe",
            self.peripheral.subscribe(characteristic),
        )
        .await
        .map_err(PollError::at(PollStage::ReadingMeasurement))?;

        let payload = timed(self.step_timeout, "measurement notification", async {
            notifications
                .next()
                .await
                .ok_or(TransportError::NotificationStreamEnded)
        })
        .await;

        if let Err(err) = timed(
            self.step_timeout,
            "unsubscribe",
            self.peripheral.unsubscribe(characteristic),
        )
        .await
        {
            tracing::debug!(%err, "failed to unsubscribe from measurement notifications");
        }

        payload
            .and_then(|data| {
                GattMeasurement::decode(&data).map_err(TransportError::MalformedPayload)
            })
            .map_err(PollError::at(PollStage::ReadingMeasurement))
    }
}

/// Await `future`, bounded by `limit` when one is configured.
async fn timed<T>(
    limit: Option<Duration>,
    operation: &'static str,
    future: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match limit {
        Some(after) => tokio::time::timeout(after, future)
            .await
            .map_err(|_| TransportError::Timeout { operation, after })?,
        None => future.await,
    }
}
