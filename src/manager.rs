//! Manager tying discovery and the connection session to one radio.
//!
//! [`SppManager`] is the shareable entry point: wrap it in an `Arc` and call
//! it from any task. Session operations are serialized internally, so a send
//! never observes a link that a concurrent disconnect is releasing.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::device::DeviceDescriptor;
use crate::discovery::DiscoveryCoordinator;
use crate::error::Result;
use crate::radio::Radio;
use crate::session::{ConnectionEvent, ConnectionSession, ConnectionState};

/// Central manager for scanning and the single SPP connection.
pub struct SppManager<R: Radio> {
    /// The radio shared by discovery and the session.
    radio: Arc<R>,
    /// Discovery coordinator.
    discovery: DiscoveryCoordinator<R>,
    /// The connection session.
    session: Mutex<ConnectionSession<R>>,
    /// State mirror readable without waiting for the session lock.
    state: Arc<RwLock<ConnectionState>>,
    /// Connection event channel.
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Configuration in effect.
    config: SessionConfig,
}

impl<R: Radio> SppManager<R> {
    /// Create a manager with the default configuration.
    pub fn new(radio: Arc<R>) -> Self {
        Self::with_config(radio, SessionConfig::default())
    }

    /// Create a manager.
    pub fn with_config(radio: Arc<R>, config: SessionConfig) -> Self {
        let discovery = DiscoveryCoordinator::with_config(radio.clone(), &config);
        let session = ConnectionSession::with_config(radio.clone(), &config);
        let state = session.shared_state();
        let event_tx = session.event_sender();

        Self {
            radio,
            discovery,
            session: Mutex::new(session),
            state,
            event_tx,
            config,
        }
    }

    /// Scan for bonded and nearby devices.
    ///
    /// See [`DiscoveryCoordinator::start_scan`].
    pub async fn scan(&self) -> Result<Vec<DeviceDescriptor>> {
        self.discovery.start_scan().await
    }

    /// Connect to the device at `address`.
    ///
    /// See [`ConnectionSession::connect`].
    pub async fn connect(&self, address: &str) -> Result<()> {
        self.session.lock().await.connect(address).await
    }

    /// Write bytes to the connected device.
    ///
    /// See [`ConnectionSession::send`].
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.session.lock().await.send(bytes).await
    }

    /// Write integer payload values, converted to bytes with the configured
    /// [`ByteConversion`](crate::ByteConversion).
    pub async fn send_values(&self, values: &[i64]) -> Result<()> {
        let bytes = self.config.byte_conversion.convert(values)?;
        self.send(&bytes).await
    }

    /// Disconnect. Never fails.
    pub async fn disconnect(&self) {
        self.session.lock().await.disconnect().await
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Address of the connected peer.
    pub async fn connected_address(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .connected_address()
            .map(str::to_string)
    }

    /// Check if a scan is outstanding.
    pub fn is_scanning(&self) -> bool {
        self.discovery.is_scanning()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Get the configuration in effect.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the underlying radio.
    pub fn radio(&self) -> &Arc<R> {
        &self.radio
    }

    /// Stop any discovery and close the connection.
    pub async fn shutdown(&self) {
        info!("Shutting down SPP manager");

        if let Err(e) = self.radio.cancel_discovery().await {
            debug!("Failed to cancel discovery during shutdown: {}", e);
        }

        self.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteConversion;
    use crate::radio::mock::MockRadio;
    use crate::Error;

    const PEER: &str = "AA:BB:CC:DD:EE:FF";

    #[tokio::test]
    async fn test_state_mirror_follows_session() {
        let radio = Arc::new(MockRadio::new().with_known_address(PEER));
        let manager = SppManager::new(radio.clone());
        assert_eq!(manager.connection_state(), ConnectionState::Idle);

        manager.connect(PEER).await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(manager.connected_address().await.as_deref(), Some(PEER));

        manager.disconnect().await;
        assert_eq!(manager.connection_state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_send_values_wraps_by_default() {
        let radio = Arc::new(MockRadio::new().with_known_address(PEER));
        let manager = SppManager::new(radio.clone());
        manager.connect(PEER).await.unwrap();

        manager.send_values(&[72, 361, -1]).await.unwrap();
        assert_eq!(radio.transmitted(), vec![0x48, 0x69, 0xFF]);
    }

    #[tokio::test]
    async fn test_send_values_rejects_when_configured() {
        let radio = Arc::new(MockRadio::new().with_known_address(PEER));
        let config = SessionConfig::default().with_byte_conversion(ByteConversion::Reject);
        let manager = SppManager::with_config(radio.clone(), config);
        manager.connect(PEER).await.unwrap();

        let err = manager.send_values(&[72, 256]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidByte { index: 1, value: 256 }));
        assert!(radio.transmitted().is_empty());
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_events_reach_manager_subscribers() {
        let radio = Arc::new(MockRadio::new().with_known_address(PEER));
        let manager = SppManager::new(radio);
        let mut events = manager.subscribe();

        manager.connect(PEER).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.state, ConnectionState::Connecting);
        assert_eq!(event.address, PEER);
        let event = events.recv().await.unwrap();
        assert_eq!(event.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connection() {
        let radio = Arc::new(MockRadio::new().with_known_address(PEER));
        let manager = SppManager::new(radio.clone());
        manager.connect(PEER).await.unwrap();

        manager.shutdown().await;

        assert!(!manager.is_connected());
        assert_eq!(radio.live_sockets(), 0);
    }

    #[test]
    fn test_manager_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SppManager<MockRadio>>();
    }
}
