//! Session configuration.

use std::time::Duration;

use crate::error::Result;
use crate::utils::{checked_bytes, wrapping_bytes};

/// What `connect` does when a connection is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OnConnected {
    /// Fail with [`Error::AlreadyConnected`](crate::Error::AlreadyConnected)
    /// and leave the live link untouched.
    #[default]
    Reject,
    /// Disconnect the live link, then connect to the new address.
    Replace,
}

/// How integer payload values are turned into bytes at the command boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteConversion {
    /// Keep the low 8 bits of each value.
    #[default]
    Wrap,
    /// Fail on any value outside `0..=255`.
    Reject,
}

impl ByteConversion {
    /// Convert payload values according to this policy.
    pub fn convert(&self, values: &[i64]) -> Result<Vec<u8>> {
        match self {
            Self::Wrap => Ok(wrapping_bytes(values)),
            Self::Reject => checked_bytes(values),
        }
    }
}

/// Configuration shared by the discovery coordinator and the connection
/// session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Upper bound on a discovery scan. `None` waits for the radio to
    /// report that discovery finished, however long that takes.
    pub scan_timeout: Option<Duration>,
    /// Behavior of `connect` while already connected.
    pub on_connected: OnConnected,
    /// Conversion applied to `send` payloads received as integers.
    pub byte_conversion: ByteConversion,
    /// Capacity of the connection event broadcast channel.
    pub event_capacity: usize,
}

impl SessionConfig {
    /// Default connection event channel capacity.
    pub const DEFAULT_EVENT_CAPACITY: usize = 16;

    /// Bound discovery scans by `timeout`.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    /// Set the double-connect behavior.
    pub fn with_on_connected(mut self, on_connected: OnConnected) -> Self {
        self.on_connected = on_connected;
        self
    }

    /// Set the payload byte conversion.
    pub fn with_byte_conversion(mut self, conversion: ByteConversion) -> Self {
        self.byte_conversion = conversion;
        self
    }

    /// Set the connection event channel capacity (minimum 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: None,
            on_connected: OnConnected::default(),
            byte_conversion: ByteConversion::default(),
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}
