//! Bluetooth Classic service class UUIDs.

use uuid::Uuid;

/// Serial Port Profile service class UUID (`00001101-0000-1000-8000-00805F9B34FB`).
pub const SPP_UUID: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_00805f9b34fb);

/// Bluetooth base UUID, of which all 16-bit service class UUIDs are aliases.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// Expand a 16-bit service class alias onto the Bluetooth base UUID.
pub const fn short_uuid(alias: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((alias as u128) << 96))
}

/// Check if a UUID is the Serial Port Profile service class.
pub fn is_spp_service(uuid: &Uuid) -> bool {
    *uuid == SPP_UUID
}
