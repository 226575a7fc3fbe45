//! BlueZ radio for Linux.
//!
//! Discovery runs for a fixed window (BlueZ has no discovery-finished
//! signal of its own), after which the subscriber is told that discovery
//! finished. Connections are made by registering an SPP client profile and
//! asking BlueZ to connect it, which resolves the RFCOMM channel through SDP.

use async_trait::async_trait;
use bluer::rfcomm::stream::{OwnedReadHalf, OwnedWriteHalf};
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, AdapterEvent, Address, Device, Session};
use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::radio::{EventSubscription, Radio, RadioEvent, SppSocket};

type Subscriber = Arc<Mutex<Option<(u64, mpsc::UnboundedSender<RadioEvent>)>>>;

/// A running discovery window.
struct DiscoveryTask {
    cancel: Arc<Notify>,
    handle: tokio::task::JoinHandle<()>,
}

/// Radio backed by the default BlueZ adapter.
pub struct BluezRadio {
    session: Session,
    adapter: Adapter,
    available: bool,
    discovery_window: Duration,
    subscriber: Subscriber,
    next_subscription: AtomicU64,
    discovery: Mutex<Option<DiscoveryTask>>,
}

impl BluezRadio {
    /// Default length of a discovery scan.
    pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(12);

    /// Connect to BlueZ and use its default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioUnavailable`] if BlueZ or an adapter cannot be
    /// reached.
    pub async fn new() -> Result<Self> {
        let session = Session::new()
            .await
            .map_err(|_e| Error::RadioUnavailable)?;

        let adapter = session
            .default_adapter()
            .await
            .map_err(|_e| Error::RadioUnavailable)?;

        if let Err(e) = adapter.set_powered(true).await {
            warn!("Failed to power on adapter {}: {}", adapter.name(), e);
        }
        let available = adapter.is_powered().await.unwrap_or(false);

        info!(
            "Using Bluetooth adapter {} (powered: {})",
            adapter.name(),
            available
        );

        Ok(Self {
            session,
            adapter,
            available,
            discovery_window: Self::DEFAULT_DISCOVERY_WINDOW,
            subscriber: Arc::new(Mutex::new(None)),
            next_subscription: AtomicU64::new(1),
            discovery: Mutex::new(None),
        })
    }

    /// Set the length of a discovery scan.
    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Deliver an event to the subscription that started the discovery.
    /// Returns `false` once that subscription has been replaced or released.
    fn notify(subscriber: &Subscriber, owner: Option<u64>, event: RadioEvent) -> bool {
        match subscriber.lock().as_ref() {
            Some((id, tx)) if Some(*id) == owner => tx.send(event).is_ok(),
            _ => false,
        }
    }

    async fn describe(adapter: &Adapter, address: Address) -> DeviceDescriptor {
        let name = match adapter.device(address) {
            Ok(device) => device.name().await.ok().flatten(),
            Err(_) => None,
        };
        DeviceDescriptor::new(name, address.to_string())
    }
}

#[async_trait]
impl Radio for BluezRadio {
    type Device = Device;
    type Socket = BluezSocket;

    fn is_available(&self) -> bool {
        self.available
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();

        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            if device.is_paired().await? {
                let name = device.name().await?;
                devices.push(DeviceDescriptor::new(name, address.to_string()));
            }
        }

        Ok(devices)
    }

    fn subscribe(&self) -> Result<EventSubscription> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock() = Some((id, tx));

        let subscriber = self.subscriber.clone();
        Ok(EventSubscription::new(id, rx, move || {
            let mut current = subscriber.lock();
            if matches!(current.as_ref(), Some((current_id, _)) if *current_id == id) {
                current.take();
            }
        }))
    }

    async fn start_discovery(&self) -> Result<()> {
        self.cancel_discovery().await?;

        let events = self.adapter.discover_devices().await?;
        let adapter = self.adapter.clone();
        let subscriber = self.subscriber.clone();
        let owner = subscriber.lock().as_ref().map(|(id, _)| *id);
        let window = self.discovery_window;
        let cancel = Arc::new(Notify::new());
        let cancelled = cancel.clone();

        let handle = tokio::spawn(async move {
            futures::pin_mut!(events);
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    Some(event) = events.next() => {
                        if let AdapterEvent::DeviceAdded(address) = event {
                            trace!("Device added: {}", address);
                            let device = Self::describe(&adapter, address).await;
                            Self::notify(&subscriber, owner, RadioEvent::DeviceFound(device));
                        }
                    }
                    _ = &mut deadline => break,
                    _ = cancelled.notified() => break,
                }
            }

            // Dropping the event stream stops discovery on the adapter.
            drop(events);
            debug!("Discovery window closed");
            Self::notify(&subscriber, owner, RadioEvent::DiscoveryFinished);
        });

        *self.discovery.lock() = Some(DiscoveryTask { cancel, handle });
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        let task = self.discovery.lock().take();

        if let Some(task) = task {
            debug!("Cancelling discovery");
            task.cancel.notify_one();
            if let Err(e) = task.handle.await {
                debug!("Discovery task ended abnormally: {}", e);
            }
        }

        Ok(())
    }

    async fn remote_device(&self, address: &str) -> Result<Device> {
        let invalid = || Error::InvalidAddress {
            address: address.to_string(),
        };

        let parsed: Address = address.parse().map_err(|_e| invalid())?;
        if !self.adapter.device_addresses().await?.contains(&parsed) {
            return Err(invalid());
        }

        Ok(self.adapter.device(parsed)?)
    }

    async fn create_socket(&self, device: &Device, service: Uuid) -> Result<BluezSocket> {
        Ok(BluezSocket {
            session: self.session.clone(),
            device: device.clone(),
            service,
            profile: None,
            reader: None,
            writer: None,
        })
    }
}

fn to_io(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// RFCOMM socket reached through a registered SPP client profile.
pub struct BluezSocket {
    session: Session,
    device: Device,
    service: Uuid,
    profile: Option<ProfileHandle>,
    reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
}

impl BluezSocket {
    /// Wait for BlueZ to hand over the connected stream.
    async fn accept(profile: &mut ProfileHandle) -> io::Result<Stream> {
        let request = profile.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "profile unregistered")
        })?;
        request.accept().map_err(to_io)
    }
}

#[async_trait]
impl SppSocket for BluezSocket {
    type Writer = OwnedWriteHalf;

    async fn connect(&mut self) -> io::Result<()> {
        let profile = Profile {
            uuid: self.service,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self.session.register_profile(profile).await.map_err(to_io)?;

        let connect = self.device.connect_profile(&self.service);
        tokio::pin!(connect);

        let stream = tokio::select! {
            connected = &mut connect => {
                connected.map_err(to_io)?;
                Self::accept(&mut handle).await?
            }
            stream = Self::accept(&mut handle) => {
                let stream = stream?;
                connect.await.map_err(to_io)?;
                stream
            }
        };

        let (reader, writer) = stream.into_split();
        self.profile = Some(handle);
        self.reader = Some(reader);
        self.writer = Some(writer);
        Ok(())
    }

    fn output_stream(&mut self) -> io::Result<OwnedWriteHalf> {
        self.writer
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no output stream"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.take();
        self.reader.take();
        self.profile.take();

        self.device
            .disconnect_profile(&self.service)
            .await
            .map_err(to_io)
    }
}
