//! In-process notification bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use crate::ports::{DeviceNotifier, Notification, NotifyError};

/// In-process notification bus using a tokio [`broadcast`] channel.
///
/// Publishing fails with [`NotifyError::Closed`] once every subscriber is
/// gone, since nothing would ever see the notification.
pub struct InProcessEventBus {
    sender: broadcast::Sender<Notification>,
}

impl InProcessEventBus {
    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to notifications on this bus.
    ///
    /// Returns a receiver that will get all notifications published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl DeviceNotifier for InProcessEventBus {
    fn publish(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send {
        // broadcast::send fails only when there are zero receivers.
        let result = self
            .sender
            .send(notification)
            .map(|_| ())
            .map_err(|_| NotifyError::Closed);
        std::future::ready(result)
    }
}
