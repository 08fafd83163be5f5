//! Notifier port: tells the host about devices and property updates.

use std::future::Future;

use serde::Serialize;

use mithermo_domain::measurement::PropertyChange;
use mithermo_domain::property::DeviceDescription;

/// A device-lifecycle notification for the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A device was seen for the first time (or re-announced on pairing).
    DeviceAdded(DeviceDescription),
    /// One property of a device took a new value.
    PropertyChanged(PropertyChange),
}

/// Failure to hand a notification over to the host.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The host side is gone.
    #[error("notification channel closed")]
    Closed,
}

/// Publishes device notifications to the host.
pub trait DeviceNotifier: Send + Sync {
    /// Publish a notification.
    fn publish(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

impl<T: DeviceNotifier> DeviceNotifier for std::sync::Arc<T> {
    fn publish(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send {
        (**self).publish(notification)
    }
}
