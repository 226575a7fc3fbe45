//! SPP connection session.
//!
//! Owns at most one RFCOMM link and gates connect, send and disconnect on
//! its state:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Idle      (disconnect, failed write)
//!         Connecting -> Idle                   (failed connect)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::{OnConnected, SessionConfig};
use crate::error::{Error, Result};
use crate::radio::{Radio, SppSocket, SPP_UUID};
use crate::utils::{hex_string, normalize_address};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No link.
    #[default]
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Link open and writable.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a handshake is in progress.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// Address of the peer involved in the transition.
    pub address: String,
    /// The new connection state.
    pub state: ConnectionState,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// The open socket and its write handle. They are created together and
/// released together.
struct Link<S: SppSocket> {
    address: String,
    socket: S,
    writer: S::Writer,
    connected_at: DateTime<Utc>,
}

impl<S: SppSocket> Link<S> {
    /// Release the write handle, then the socket. Errors are logged and
    /// discarded.
    async fn release(self) {
        let Link {
            address,
            mut socket,
            mut writer,
            ..
        } = self;

        if let Err(e) = writer.shutdown().await {
            debug!("Ignoring error closing output stream to {}: {}", address, e);
        }
        drop(writer);

        if let Err(e) = socket.close().await {
            debug!("Ignoring error closing socket to {}: {}", address, e);
        }
    }
}

/// Update a shared state and emit an event if it changed.
fn publish(
    state: &RwLock<ConnectionState>,
    event_tx: &broadcast::Sender<ConnectionEvent>,
    new_state: ConnectionState,
    address: &str,
) {
    let old_state = std::mem::replace(&mut *state.write(), new_state);

    if old_state != new_state {
        debug!(
            "Connection state changed: {} -> {} ({})",
            old_state, new_state, address
        );

        let _ = event_tx.send(ConnectionEvent {
            address: address.to_string(),
            state: new_state,
            at: Utc::now(),
        });
    }
}

/// Returns the state to idle if a connect attempt is abandoned mid-way.
struct ConnectingGuard {
    state: Arc<RwLock<ConnectionState>>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    address: String,
    armed: bool,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        if self.armed {
            publish(
                &self.state,
                &self.event_tx,
                ConnectionState::Idle,
                &self.address,
            );
        }
    }
}

/// A single SPP connection over a radio.
///
/// Mutating operations take `&mut self`; share a session between tasks
/// through [`SppManager`](crate::SppManager), which serializes them.
pub struct ConnectionSession<R: Radio> {
    /// The radio used to reach peers.
    radio: Arc<R>,
    /// The live link, if connected.
    link: Option<Link<R::Socket>>,
    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Behavior of connect while connected.
    on_connected: OnConnected,
}

impl<R: Radio> ConnectionSession<R> {
    /// Create an idle session with the default configuration.
    pub fn new(radio: Arc<R>) -> Self {
        Self::with_config(radio, &SessionConfig::default())
    }

    /// Create an idle session.
    pub fn with_config(radio: Arc<R>, config: &SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            radio,
            link: None,
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            event_tx,
            on_connected: config.on_connected,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Address of the connected peer.
    pub fn connected_address(&self) -> Option<&str> {
        self.link.as_ref().map(|link| link.address.as_str())
    }

    /// When the current link was established.
    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.link.as_ref().map(|link| link.connected_at)
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Shared view of the state, readable while the session is borrowed
    /// elsewhere.
    pub(crate) fn shared_state(&self) -> Arc<RwLock<ConnectionState>> {
        self.state.clone()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<ConnectionEvent> {
        self.event_tx.clone()
    }

    /// Connect to the SPP service of the device at `address`.
    ///
    /// Cancels any running discovery before the handshake, since discovery
    /// and an RFCOMM connect cannot share the radio reliably.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if the address is malformed or unknown to
    ///   the radio. The session is left as it was, including any live link.
    /// - [`Error::AlreadyConnected`] if a link is live and the session
    ///   rejects a second connect.
    /// - [`Error::ConnectFailed`] if the socket could not be opened or the
    ///   handshake failed. The partial socket is released and the session
    ///   returns to idle.
    pub async fn connect(&mut self, address: &str) -> Result<()> {
        let address = normalize_address(address)?;

        if let Some(current) = self.connected_address() {
            if self.on_connected == OnConnected::Reject {
                return Err(Error::AlreadyConnected {
                    address: current.to_string(),
                });
            }
        }

        // Resolve before touching a live link so a bad address leaves it intact.
        let device = self.radio.remote_device(&address).await.map_err(|e| match e {
            Error::InvalidAddress { .. } => e,
            other => Error::ConnectFailed {
                reason: other.to_string(),
            },
        })?;

        if let Some(current) = self.connected_address().map(str::to_string) {
            info!("Replacing connection to {} with {}", current, address);
            self.disconnect().await;
        }

        self.set_state(ConnectionState::Connecting, &address);
        let mut guard = ConnectingGuard {
            state: self.state.clone(),
            event_tx: self.event_tx.clone(),
            address: address.clone(),
            armed: true,
        };

        if let Err(e) = self.radio.cancel_discovery().await {
            debug!("Failed to cancel discovery before connect: {}", e);
        }

        let outcome = Self::open_link(&self.radio, &device, &address).await;
        guard.armed = false;

        match outcome {
            Ok(link) => {
                self.link = Some(link);
                self.set_state(ConnectionState::Connected, &address);
                info!("Connected to {}", address);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Idle, &address);
                warn!("Connection to {} failed: {}", address, e);
                Err(e)
            }
        }
    }

    /// Write `bytes` in full and flush them to the transport.
    ///
    /// On an idle session this is a no-op that succeeds without touching the
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailed`] if the write or flush fails. The link
    /// is released and the session is idle afterwards.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            debug!("Send of {} bytes ignored, not connected", bytes.len());
            return Ok(());
        };

        let written = async {
            link.writer.write_all(bytes).await?;
            link.writer.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                trace!("Sent {} bytes: {}", bytes.len(), hex_string(bytes));
                Ok(())
            }
            Err(e) => {
                warn!("Write to {} failed, dropping connection: {}", link.address, e);
                self.teardown().await;
                Err(Error::WriteFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Close the link, if any. Never fails and is safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if self.link.is_none() {
            debug!("Disconnect ignored, not connected");
            return;
        }

        if let Some(address) = self.teardown().await {
            info!("Disconnected from {}", address);
        }
    }

    /// Detach the link, mark the session idle, then release the handles.
    async fn teardown(&mut self) -> Option<String> {
        let link = self.link.take()?;
        let address = link.address.clone();

        self.set_state(ConnectionState::Idle, &address);
        link.release().await;

        Some(address)
    }

    /// Open a socket, run the handshake and acquire the write handle. Any
    /// partially opened socket is closed before an error is returned.
    async fn open_link(
        radio: &R,
        device: &R::Device,
        address: &str,
    ) -> Result<Link<R::Socket>> {
        let mut socket = radio
            .create_socket(device, SPP_UUID)
            .await
            .map_err(|e| match e {
                Error::ConnectFailed { .. } => e,
                other => Error::ConnectFailed {
                    reason: other.to_string(),
                },
            })?;

        debug!("Opened RFCOMM socket to {}, connecting", address);

        if let Err(e) = socket.connect().await {
            Self::close_quietly(&mut socket, address).await;
            return Err(Error::ConnectFailed {
                reason: e.to_string(),
            });
        }

        let writer = match socket.output_stream() {
            Ok(writer) => writer,
            Err(e) => {
                Self::close_quietly(&mut socket, address).await;
                return Err(Error::ConnectFailed {
                    reason: e.to_string(),
                });
            }
        };

        Ok(Link {
            address: address.to_string(),
            socket,
            writer,
            connected_at: Utc::now(),
        })
    }

    async fn close_quietly(socket: &mut R::Socket, address: &str) {
        if let Err(e) = socket.close().await {
            debug!("Ignoring error closing failed socket to {}: {}", address, e);
        }
    }

    fn set_state(&self, new_state: ConnectionState, address: &str) {
        publish(&self.state, &self.event_tx, new_state, address);
    }
}
