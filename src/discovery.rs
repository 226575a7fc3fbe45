//! Discovery coordination.
//!
//! A scan returns the bonded devices followed by every device the radio
//! reports while discovery runs, in arrival order. The scan resolves when the
//! radio signals that discovery finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::radio::{EventSubscription, Radio, RadioEvent};

/// Milliseconds in `timeout`, saturating at `u64::MAX`.
fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Merges the bonded-device snapshot with live discovery results.
///
/// Only one scan may be outstanding at a time. This is not enforced; a
/// second concurrent scan is logged and its results are unspecified.
pub struct DiscoveryCoordinator<R: Radio> {
    /// The radio to scan with.
    radio: Arc<R>,
    /// Whether a scan is currently outstanding.
    is_scanning: Arc<AtomicBool>,
    /// Optional bound on a single scan.
    scan_timeout: Option<Duration>,
}

/// Clears the scanning flag when a scan ends, however it ends.
struct ScanningGuard(Arc<AtomicBool>);

impl Drop for ScanningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<R: Radio> DiscoveryCoordinator<R> {
    /// Create a coordinator with no scan timeout.
    pub fn new(radio: Arc<R>) -> Self {
        Self::with_config(radio, &SessionConfig::default())
    }

    /// Create a coordinator using the scan settings from `config`.
    pub fn with_config(radio: Arc<R>, config: &SessionConfig) -> Self {
        Self {
            radio,
            is_scanning: Arc::new(AtomicBool::new(false)),
            scan_timeout: config.scan_timeout,
        }
    }

    /// Check if a scan is outstanding.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Get the underlying radio.
    pub fn radio(&self) -> &Arc<R> {
        &self.radio
    }

    /// Scan for devices.
    ///
    /// Returns the bonded devices in enumeration order followed by the
    /// discovered devices in arrival order. Duplicates are kept.
    ///
    /// # Errors
    ///
    /// - [`Error::RadioUnavailable`] if the radio is missing. Nothing else
    ///   is attempted.
    /// - [`Error::ScanTimeout`] if a scan timeout is configured and elapses.
    /// - [`Error::ScanInterrupted`] if the radio stops delivering events
    ///   before discovery finished.
    pub async fn start_scan(&self) -> Result<Vec<DeviceDescriptor>> {
        if !self.radio.is_available() {
            warn!("Scan requested but no Bluetooth radio is available");
            return Err(Error::RadioUnavailable);
        }

        if self.is_scanning.swap(true, Ordering::SeqCst) {
            warn!("Scan started while another scan is outstanding");
        }
        let _scanning = ScanningGuard(self.is_scanning.clone());

        let mut devices = self.radio.bonded_devices().await?;
        debug!("Seeded scan with {} bonded devices", devices.len());

        // Dropping the subscription on any early return releases it.
        let mut subscription = self.radio.subscribe()?;
        self.radio.start_discovery().await?;
        info!("Discovery started");

        let outcome = match self.scan_timeout {
            None => Self::collect(&mut subscription, &mut devices).await,
            Some(timeout) => {
                match tokio::time::timeout(timeout, Self::collect(&mut subscription, &mut devices))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("Discovery did not finish within {:?}, cancelling", timeout);
                        if let Err(e) = self.radio.cancel_discovery().await {
                            debug!("Failed to cancel discovery: {}", e);
                        }
                        Err(Error::ScanTimeout {
                            timeout_ms: timeout_millis(timeout),
                        })
                    }
                }
            }
        };

        outcome?;
        subscription.unsubscribe();

        info!("Discovery finished with {} devices", devices.len());
        Ok(devices)
    }

    /// Append found devices until discovery finishes.
    async fn collect(
        subscription: &mut EventSubscription,
        devices: &mut Vec<DeviceDescriptor>,
    ) -> Result<()> {
        while let Some(event) = subscription.next().await {
            match event {
                RadioEvent::DeviceFound(device) => {
                    trace!("Device found: {}", device);
                    devices.push(device);
                }
                RadioEvent::DiscoveryFinished => return Ok(()),
            }
        }

        warn!("Radio event stream closed before discovery finished");
        Err(Error::ScanInterrupted)
    }
}
