//! # spp-session
//!
//! Manages a single Bluetooth Classic Serial Port Profile (SPP) session:
//! discovering paired and nearby devices, holding one RFCOMM connection,
//! writing raw bytes to it and tearing it down cleanly.
//!
//! The crate is a raw pipe. Message framing is up to the caller.
//!
//! ## Features
//!
//! - **Discovery**: bonded devices first, then devices found by a live scan,
//!   resolved when the radio reports that discovery finished
//! - **One connection**: at most one live link; its socket and write handle
//!   are always released together
//! - **Flushed writes**: `send` returns once the bytes reached the transport
//! - **Write failure detection**: a failed write resets the session to idle
//! - **Substitutable radio**: the adapter is a [`Radio`] passed in, with an
//!   in-memory [`MockRadio`] for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "bluez")]
//! # async fn run() -> spp_session::Result<()> {
//! use spp_session::radio::bluez::BluezRadio;
//! use spp_session::SppManager;
//! use std::sync::Arc;
//!
//! let manager = SppManager::new(Arc::new(BluezRadio::new().await?));
//!
//! for device in manager.scan().await? {
//!     println!("{} {}", device.address, device.name);
//! }
//!
//! manager.connect("00:11:22:33:44:55").await?;
//! manager.send(b"Hello").await?;
//! manager.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Enable the `bluez` feature. Requires BlueZ; the user may need to be in the
//! `bluetooth` group. The peer must be paired before connecting.
//!
//! ## Feature Flags
//!
//! - `bluez`: BlueZ radio backend
//! - `serde`: Enable serialization/deserialization for data types

pub mod command;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod radio;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use command::{Command, MethodCall, Reply};
pub use config::{ByteConversion, OnConnected, SessionConfig};
pub use device::DeviceDescriptor;
pub use discovery::DiscoveryCoordinator;
pub use error::{Error, Result};
pub use manager::SppManager;
pub use radio::mock::MockRadio;
pub use radio::{EventSubscription, Radio, RadioEvent, SppSocket, SPP_UUID};
pub use session::{ConnectionEvent, ConnectionSession, ConnectionState};
pub use utils::{checked_bytes, hex_string, is_valid_address, wrapping_bytes};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SppManager<MockRadio>>();
        let _ = std::any::TypeId::of::<ConnectionSession<MockRadio>>();
        let _ = std::any::TypeId::of::<DiscoveryCoordinator<MockRadio>>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<DeviceDescriptor>();
        let _ = std::any::TypeId::of::<SessionConfig>();
    }

    #[test]
    fn test_spp_uuid_export() {
        assert_eq!(
            SPP_UUID.to_string().to_uppercase(),
            "00001101-0000-1000-8000-00805F9B34FB"
        );
    }
}
