//! Periodic GATT readout of encrypted sensors.
//!
//! On every tick the engine visits each encrypted device **sequentially**
//! and runs one [`PollCycle`] to completion before starting the next one:
//! one controller does not run concurrent GATT sessions. Poll requests sent
//! by the scan controller for newly seen devices are served as soon as they
//! arrive, between ticks.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use mithermo_domain::error::RegistryError;
use mithermo_domain::id::DeviceId;
use mithermo_domain::measurement::{EncryptedReading, PropertyChange};

use crate::poll_cycle::{PollCycle, PollError};
use crate::ports::{DeviceNotifier, GattPeripheral, Notification};
use crate::registry::DeviceRegistry;

/// Default interval between two polling rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Timing settings for the polling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Period of the polling timer.
    pub interval: Duration,
    /// Bound on every GATT step; `None` waits for the transport to give up.
    pub step_timeout: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            step_timeout: None,
        }
    }
}

/// Ask the engine to poll a device right away and keep its handle.
#[derive(Debug, Clone)]
pub struct PollRequest<P> {
    pub device_id: DeviceId,
    pub peripheral: P,
}

/// Why polling one device produced no update.
#[derive(Debug, thiserror::Error)]
pub enum PollingError {
    /// The device is known but its peripheral handle was never received.
    #[error("no peripheral handle for device {0}")]
    NoPeripheral(DeviceId),

    /// Connecting or discovering failed.
    #[error("poll cycle aborted")]
    Cycle(#[from] PollError),

    /// Connected, but neither read succeeded.
    #[error("no value could be read")]
    NothingRead,

    /// The registry refused the reading.
    #[error("registry rejected reading")]
    Registry(#[from] RegistryError),
}

/// Counters for one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Polls encrypted devices on a fixed period.
pub struct PollingEngine<P, N> {
    registry: DeviceRegistry,
    notifier: N,
    config: PollingConfig,
    peripherals: HashMap<DeviceId, P>,
}

impl<P: GattPeripheral, N: DeviceNotifier> PollingEngine<P, N> {
    /// Create an engine sharing `registry` with the scan controller.
    pub fn new(registry: DeviceRegistry, notifier: N, config: PollingConfig) -> Self {
        Self {
            registry,
            notifier,
            config,
            peripherals: HashMap::new(),
        }
    }

    /// Remember the peripheral handle to use for `device_id`.
    pub fn track(&mut self, device_id: DeviceId, peripheral: P) {
        self.peripherals.insert(device_id, peripheral);
    }

    /// Serve poll requests and timer ticks until the task is dropped.
    ///
    /// The first tick fires one full interval after start; devices seen in
    /// the meantime are polled through their request.
    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<PollRequest<P>>) {
        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accepting = true;

        tracing::info!(interval = ?period, "polling engine started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.tick().await;
                    tracing::debug!(
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        "polling round complete"
                    );
                }
                request = requests.recv(), if accepting => match request {
                    Some(PollRequest { device_id, peripheral }) => {
                        self.track(device_id.clone(), peripheral);
                        if let Err(err) = self.poll_device(&device_id).await {
                            tracing::warn!(%err, device = %device_id, "first poll failed");
                        }
                    }
                    None => {
                        tracing::debug!("poll request channel closed");
                        accepting = false;
                    }
                },
            }
        }
    }

    /// Run one polling round over every encrypted device, one at a time.
    pub async fn tick(&mut self) -> TickSummary {
        let mut ids = Vec::new();
        self.registry
            .for_each_encrypted(|record| ids.push(record.id.clone()));

        let mut summary = TickSummary::default();
        for id in ids {
            match self.poll_device(&id).await {
                Ok(_) => summary.succeeded += 1,
                Err(err) => {
                    tracing::warn!(%err, device = %id, "poll failed, retrying next round");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Poll a single device and apply whatever could be read.
    ///
    /// # Errors
    ///
    /// Returns [`PollingError`] when the cycle aborted or produced nothing.
    #[tracing::instrument(skip_all, fields(device = %device_id))]
    pub async fn poll_device(&self, device_id: &DeviceId) -> Result<EncryptedReading, PollingError> {
        let peripheral = self
            .peripherals
            .get(device_id)
            .ok_or_else(|| PollingError::NoPeripheral(device_id.clone()))?;

        let outcome = PollCycle::new(peripheral, self.config.step_timeout)
            .run()
            .await?;
        for failure in &outcome.failures {
            tracing::warn!(err = %failure, source = %failure.source, "partial poll failure");
        }
        if outcome.reading.is_empty() {
            return Err(PollingError::NothingRead);
        }

        let changed = self
            .registry
            .apply_encrypted_reading(device_id, &outcome.reading)?;
        tracing::debug!(reading = ?outcome.reading, "encrypted reading applied");

        for value in changed {
            let notification = Notification::PropertyChanged(PropertyChange {
                device_id: device_id.clone(),
                value,
            });
            if let Err(err) = self.notifier.publish(notification).await {
                tracing::warn!(%err, "failed to publish property change");
            }
        }

        Ok(outcome.reading)
    }
}
