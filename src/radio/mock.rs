//! In-memory radio for tests.
//!
//! [`MockRadio`] records everything the session does to it: subscriptions,
//! discovery runs, sockets and writers still alive, and the bytes that were
//! flushed onto the simulated transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::radio::{EventSubscription, Radio, RadioEvent, SppSocket, SPP_UUID};

type Subscriber = Option<(u64, mpsc::UnboundedSender<RadioEvent>)>;

/// Bytes seen by the simulated transport.
#[derive(Debug, Default)]
struct TransportLog {
    /// Written but not yet flushed.
    pending: Vec<u8>,
    /// Flushed to the peer.
    flushed: Vec<u8>,
    /// Number of successful write calls.
    writes: usize,
}

/// Shared counters and switches between the radio and the handles it
/// hands out.
#[derive(Debug, Default)]
struct Shared {
    transport: Mutex<TransportLog>,
    live_sockets: AtomicUsize,
    live_writers: AtomicUsize,
    closed_sockets: AtomicUsize,
    fail_writes: AtomicBool,
    fail_close: AtomicBool,
    hold_connects: AtomicBool,
}

/// A scriptable radio with no hardware behind it.
#[derive(Debug)]
pub struct MockRadio {
    available: bool,
    bonded: Mutex<Vec<DeviceDescriptor>>,
    nearby: Mutex<Vec<DeviceDescriptor>>,
    known: Mutex<HashSet<String>>,
    auto_finish: AtomicBool,
    subscriber: Arc<Mutex<Subscriber>>,
    next_subscription: AtomicU64,
    subscriptions: AtomicUsize,
    unsubscriptions: Arc<AtomicUsize>,
    discovering: AtomicBool,
    discovery_owner: Mutex<Option<u64>>,
    discovery_cancels: AtomicUsize,
    connect_failures: Mutex<VecDeque<String>>,
    sockets_created: AtomicUsize,
    shared: Arc<Shared>,
}

/// Remote device handle issued by [`MockRadio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    /// Address of the device.
    pub address: String,
}

impl MockRadio {
    /// Create an available radio with no known devices.
    ///
    /// Discovery reports the nearby devices and then finishes immediately;
    /// see [`manual_finish`](Self::manual_finish).
    pub fn new() -> Self {
        Self {
            available: true,
            bonded: Mutex::new(Vec::new()),
            nearby: Mutex::new(Vec::new()),
            known: Mutex::new(HashSet::new()),
            auto_finish: AtomicBool::new(true),
            subscriber: Arc::new(Mutex::new(None)),
            next_subscription: AtomicU64::new(1),
            subscriptions: AtomicUsize::new(0),
            unsubscriptions: Arc::new(AtomicUsize::new(0)),
            discovering: AtomicBool::new(false),
            discovery_owner: Mutex::new(None),
            discovery_cancels: AtomicUsize::new(0),
            connect_failures: Mutex::new(VecDeque::new()),
            sockets_created: AtomicUsize::new(0),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Create a radio that reports no Bluetooth capability.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Add bonded devices. They also become resolvable.
    pub fn with_bonded(self, devices: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        for device in devices {
            self.known.lock().insert(device.address.to_ascii_uppercase());
            self.bonded.lock().push(device);
        }
        self
    }

    /// Add devices reported by discovery, in arrival order. They also become
    /// resolvable.
    pub fn with_nearby(self, devices: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        for device in devices {
            self.known.lock().insert(device.address.to_ascii_uppercase());
            self.nearby.lock().push(device);
        }
        self
    }

    /// Make an address resolvable without it showing up in any scan.
    pub fn with_known_address(self, address: &str) -> Self {
        self.known.lock().insert(address.to_ascii_uppercase());
        self
    }

    /// Do not finish discovery on its own; tests drive it with
    /// [`emit`](Self::emit).
    pub fn manual_finish(self) -> Self {
        self.auto_finish.store(false, Ordering::SeqCst);
        self
    }

    /// Make the next connect handshake fail with `reason`.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.connect_failures.lock().push_back(reason.into());
    }

    /// Keep connect handshakes from completing. A handshake started while
    /// this is set stays pending until its future is dropped.
    pub fn set_hold_connects(&self, hold: bool) {
        self.shared.hold_connects.store(hold, Ordering::SeqCst);
    }

    /// Make every write and flush fail with a broken pipe.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make socket close report an error.
    pub fn set_fail_close(&self, fail: bool) {
        self.shared.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event to the current subscriber. Returns `false` when
    /// nobody is subscribed.
    pub fn emit(&self, event: RadioEvent) -> bool {
        if event == RadioEvent::DiscoveryFinished {
            self.discovering.store(false, Ordering::SeqCst);
            self.discovery_owner.lock().take();
        }

        match self.subscriber.lock().as_ref() {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an event only if subscription `owner` is still current.
    fn notify_owner(&self, owner: Option<u64>, event: RadioEvent) -> bool {
        match self.subscriber.lock().as_ref() {
            Some((id, tx)) if Some(*id) == owner => tx.send(event).is_ok(),
            _ => false,
        }
    }

    /// Drop the event sender without signalling discovery finished.
    pub fn drop_subscriber(&self) {
        self.subscriber.lock().take();
    }

    /// Bytes flushed onto the transport, in order.
    pub fn transmitted(&self) -> Vec<u8> {
        self.shared.transport.lock().flushed.clone()
    }

    /// Bytes written but never flushed.
    pub fn unflushed(&self) -> Vec<u8> {
        self.shared.transport.lock().pending.clone()
    }

    /// Number of successful write calls.
    pub fn write_calls(&self) -> usize {
        self.shared.transport.lock().writes
    }

    /// Sockets created and not yet dropped.
    pub fn live_sockets(&self) -> usize {
        self.shared.live_sockets.load(Ordering::SeqCst)
    }

    /// Write handles issued and not yet dropped.
    pub fn live_writers(&self) -> usize {
        self.shared.live_writers.load(Ordering::SeqCst)
    }

    /// Number of `close` calls made on sockets.
    pub fn closed_sockets(&self) -> usize {
        self.shared.closed_sockets.load(Ordering::SeqCst)
    }

    /// Total sockets ever created.
    pub fn sockets_created(&self) -> usize {
        self.sockets_created.load(Ordering::SeqCst)
    }

    /// Total subscriptions taken.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Total subscriptions released.
    pub fn unsubscriptions(&self) -> usize {
        self.unsubscriptions.load(Ordering::SeqCst)
    }

    /// Whether a subscription is currently held.
    pub fn has_subscriber(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    /// Whether discovery is running.
    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    /// Number of times a running discovery was cancelled.
    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Radio for MockRadio {
    type Device = MockDevice;
    type Socket = MockSocket;

    fn is_available(&self) -> bool {
        self.available
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.bonded.lock().clone())
    }

    fn subscribe(&self) -> Result<EventSubscription> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock() = Some((id, tx));
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let subscriber = self.subscriber.clone();
        let unsubscriptions = self.unsubscriptions.clone();

        Ok(EventSubscription::new(id, rx, move || {
            let mut current = subscriber.lock();
            if matches!(current.as_ref(), Some((current_id, _)) if *current_id == id) {
                current.take();
            }
            unsubscriptions.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn start_discovery(&self) -> Result<()> {
        self.cancel_discovery().await?;

        *self.discovery_owner.lock() = self.subscriber.lock().as_ref().map(|(id, _)| *id);
        self.discovering.store(true, Ordering::SeqCst);

        let nearby = self.nearby.lock().clone();
        for device in nearby {
            trace!("Mock discovery found {}", device);
            self.emit(RadioEvent::DeviceFound(device));
        }

        if self.auto_finish.load(Ordering::SeqCst) {
            self.emit(RadioEvent::DiscoveryFinished);
        }

        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        if self.discovering.swap(false, Ordering::SeqCst) {
            self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
            let owner = self.discovery_owner.lock().take();
            self.notify_owner(owner, RadioEvent::DiscoveryFinished);
        }
        Ok(())
    }

    async fn remote_device(&self, address: &str) -> Result<MockDevice> {
        let address = address.to_ascii_uppercase();
        if self.known.lock().contains(&address) {
            Ok(MockDevice { address })
        } else {
            Err(Error::InvalidAddress { address })
        }
    }

    async fn create_socket(&self, device: &MockDevice, service: Uuid) -> Result<MockSocket> {
        if service != SPP_UUID {
            return Err(Error::ConnectFailed {
                reason: format!("service {} not offered by {}", service, device.address),
            });
        }

        self.sockets_created.fetch_add(1, Ordering::SeqCst);
        self.shared.live_sockets.fetch_add(1, Ordering::SeqCst);

        Ok(MockSocket {
            address: device.address.clone(),
            failure: self.connect_failures.lock().pop_front(),
            connected: false,
            writer_issued: false,
            shared: self.shared.clone(),
        })
    }
}

/// Socket issued by [`MockRadio`].
#[derive(Debug)]
pub struct MockSocket {
    address: String,
    failure: Option<String>,
    connected: bool,
    writer_issued: bool,
    shared: Arc<Shared>,
}

impl MockSocket {
    /// Address of the remote end.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl SppSocket for MockSocket {
    type Writer = MockWriter;

    async fn connect(&mut self) -> io::Result<()> {
        if self.shared.hold_connects.load(Ordering::SeqCst) {
            trace!("Holding handshake to {}", self.address);
            futures::future::pending::<()>().await;
        }
        if let Some(reason) = self.failure.take() {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, reason));
        }
        self.connected = true;
        Ok(())
    }

    fn output_stream(&mut self) -> io::Result<MockWriter> {
        if !self.connected {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket is not connected",
            ));
        }
        if self.writer_issued {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "output stream already taken",
            ));
        }

        self.writer_issued = true;
        self.shared.live_writers.fetch_add(1, Ordering::SeqCst);

        Ok(MockWriter {
            shared: self.shared.clone(),
        })
    }

    async fn close(&mut self) -> io::Result<()> {
        self.connected = false;
        self.shared.closed_sockets.fetch_add(1, Ordering::SeqCst);

        if self.shared.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "close failed"));
        }
        Ok(())
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        self.shared.live_sockets.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Write handle issued by [`MockSocket`].
#[derive(Debug)]
pub struct MockWriter {
    shared: Arc<Shared>,
}

impl MockWriter {
    fn broken_pipe() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "peer went away")
    }

    fn failing(&self) -> bool {
        self.shared.fail_writes.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for MockWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.failing() {
            return Poll::Ready(Err(Self::broken_pipe()));
        }

        let mut transport = self.shared.transport.lock();
        transport.pending.extend_from_slice(buf);
        transport.writes += 1;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.failing() {
            return Poll::Ready(Err(Self::broken_pipe()));
        }

        let mut transport = self.shared.transport.lock();
        let pending = std::mem::take(&mut transport.pending);
        transport.flushed.extend_from_slice(&pending);
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        self.shared.live_writers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn device(n: u8) -> DeviceDescriptor {
        DeviceDescriptor::named(format!("dev{}", n), format!("00:00:00:00:00:{:02X}", n))
    }

    #[tokio::test]
    async fn test_discovery_reports_nearby_then_finishes() {
        let radio = MockRadio::new().with_nearby([device(1), device(2)]);
        let mut subscription = radio.subscribe().unwrap();

        radio.start_discovery().await.unwrap();

        assert_eq!(subscription.next().await, Some(RadioEvent::DeviceFound(device(1))));
        assert_eq!(subscription.next().await, Some(RadioEvent::DeviceFound(device(2))));
        assert_eq!(subscription.next().await, Some(RadioEvent::DiscoveryFinished));
        assert!(!radio.is_discovering());

        subscription.unsubscribe();
        assert!(!radio.has_subscriber());
        assert_eq!(radio.unsubscriptions(), 1);
    }

    #[tokio::test]
    async fn test_cancel_only_finishes_the_discovery_owner() {
        let radio = MockRadio::new().manual_finish();
        let first = radio.subscribe().unwrap();
        radio.start_discovery().await.unwrap();
        drop(first);

        let mut second = radio.subscribe().unwrap();
        radio.start_discovery().await.unwrap();
        assert_eq!(radio.discovery_cancels(), 1);
        assert!(radio.is_discovering());
        tokio_test::assert_pending!(tokio_test::task::spawn(second.next()).poll());

        radio.cancel_discovery().await.unwrap();
        assert_eq!(second.next().await, Some(RadioEvent::DiscoveryFinished));
        assert_eq!(radio.discovery_cancels(), 2);
    }

    #[tokio::test]
    async fn test_remote_device_resolution() {
        let radio = MockRadio::new().with_known_address("aa:bb:cc:dd:ee:ff");
        assert!(radio.remote_device("AA:BB:CC:DD:EE:FF").await.is_ok());
        assert!(matches!(
            radio.remote_device("11:22:33:44:55:66").await,
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_socket_lifecycle_counters() {
        let radio = MockRadio::new().with_known_address("AA:BB:CC:DD:EE:FF");
        let device = radio.remote_device("AA:BB:CC:DD:EE:FF").await.unwrap();
        let mut socket = radio.create_socket(&device, SPP_UUID).await.unwrap();
        assert_eq!(radio.live_sockets(), 1);

        assert!(socket.output_stream().is_err());
        socket.connect().await.unwrap();

        let mut writer = socket.output_stream().unwrap();
        assert_eq!(radio.live_writers(), 1);
        assert!(socket.output_stream().is_err());

        writer.write_all(b"ok").await.unwrap();
        assert_eq!(radio.unflushed(), b"ok".to_vec());
        writer.flush().await.unwrap();
        assert_eq!(radio.transmitted(), b"ok".to_vec());

        drop(writer);
        socket.close().await.unwrap();
        drop(socket);
        assert_eq!(radio.live_writers(), 0);
        assert_eq!(radio.live_sockets(), 0);
        assert_eq!(radio.closed_sockets(), 1);
    }

    #[tokio::test]
    async fn test_scripted_connect_failure() {
        let radio = MockRadio::new().with_known_address("AA:BB:CC:DD:EE:FF");
        radio.fail_next_connect("page timeout");

        let device = radio.remote_device("AA:BB:CC:DD:EE:FF").await.unwrap();
        let mut socket = radio.create_socket(&device, SPP_UUID).await.unwrap();
        let err = socket.connect().await.unwrap_err();
        assert_eq!(err.to_string(), "page timeout");

        let mut socket = radio.create_socket(&device, SPP_UUID).await.unwrap();
        assert!(socket.connect().await.is_ok());
    }
}
