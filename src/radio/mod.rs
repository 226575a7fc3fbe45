//! Radio abstraction.
//!
//! The host Bluetooth adapter is an explicit dependency of the discovery
//! coordinator and the connection session. Implementations exist for BlueZ
//! (feature `bluez`) and for tests ([`mock::MockRadio`]).

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod mock;
pub mod uuids;

use async_trait::async_trait;
use std::io;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::device::DeviceDescriptor;
use crate::error::Result;

pub use uuids::SPP_UUID;

/// Signals delivered by the radio while a subscription is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A device was found by the running discovery.
    DeviceFound(DeviceDescriptor),
    /// Discovery has ended.
    DiscoveryFinished,
}

/// Scoped subscription to [`RadioEvent`]s.
///
/// The radio is told to stop delivering events exactly once: on an explicit
/// [`unsubscribe`](Self::unsubscribe) or when the subscription is dropped.
pub struct EventSubscription {
    id: u64,
    events: mpsc::UnboundedReceiver<RadioEvent>,
    unsubscribe_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl EventSubscription {
    /// Create a subscription reading from `events`, calling `unsubscribe_fn`
    /// on release.
    pub fn new(
        id: u64,
        events: mpsc::UnboundedReceiver<RadioEvent>,
        unsubscribe_fn: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            events,
            unsubscribe_fn: Some(Box::new(unsubscribe_fn)),
        }
    }

    /// Wait for the next event. Returns `None` once the radio has dropped its
    /// sender.
    pub async fn next(&mut self) -> Option<RadioEvent> {
        self.events.recv().await
    }

    /// Release the subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Get the subscription ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn release(&mut self) {
        if let Some(f) = self.unsubscribe_fn.take() {
            self.events.close();
            f();
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("active", &self.unsubscribe_fn.is_some())
            .finish()
    }
}

/// A local Bluetooth Classic adapter.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Resolved handle to a remote device.
    type Device: Send + Sync;
    /// RFCOMM socket type produced by this radio.
    type Socket: SppSocket;

    /// Whether a usable radio is present.
    fn is_available(&self) -> bool;

    /// Devices already bonded with this radio, in platform enumeration order.
    async fn bonded_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Subscribe to device-found and discovery-finished events.
    fn subscribe(&self) -> Result<EventSubscription>;

    /// Start an asynchronous discovery scan.
    async fn start_discovery(&self) -> Result<()>;

    /// Cancel a running discovery scan. A no-op when none is running.
    async fn cancel_discovery(&self) -> Result<()>;

    /// Resolve an address to a remote device handle.
    ///
    /// Fails with [`Error::InvalidAddress`](crate::Error::InvalidAddress)
    /// when the address does not name a device known to the radio.
    async fn remote_device(&self, address: &str) -> Result<Self::Device>;

    /// Create an unconnected RFCOMM socket to `device` for `service`.
    async fn create_socket(&self, device: &Self::Device, service: Uuid) -> Result<Self::Socket>;
}

/// An RFCOMM stream socket.
#[async_trait]
pub trait SppSocket: Send + 'static {
    /// Outbound half of the open stream.
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Perform the connect handshake. Suspends until the peer accepts or
    /// the attempt fails.
    async fn connect(&mut self) -> io::Result<()>;

    /// Acquire the write handle of a connected socket.
    fn output_stream(&mut self) -> io::Result<Self::Writer>;

    /// Close the socket.
    async fn close(&mut self) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted_subscription() -> (
        EventSubscription,
        mpsc::UnboundedSender<RadioEvent>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let subscription = EventSubscription::new(7, rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (subscription, tx, released)
    }

    #[tokio::test]
    async fn test_subscription_delivers_events() {
        let (mut subscription, tx, _) = counted_subscription();
        tx.send(RadioEvent::DiscoveryFinished).unwrap();
        assert_eq!(subscription.next().await, Some(RadioEvent::DiscoveryFinished));
        assert_eq!(subscription.id(), 7);
    }

    #[test]
    fn test_unsubscribe_releases_once() {
        let (subscription, tx, released) = counted_subscription();
        subscription.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.is_closed());
    }

    #[test]
    fn test_drop_releases_once() {
        let (subscription, _tx, released) = counted_subscription();
        drop(subscription);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
