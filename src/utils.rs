//! Utility functions for the spp-session crate.

use crate::error::{Error, Result};

/// Check whether a string is a Bluetooth device address of the form
/// `XX:XX:XX:XX:XX:XX`.
///
/// Hex digits may be upper or lower case.
///
/// # Example
///
/// ```
/// use spp_session::is_valid_address;
///
/// assert!(is_valid_address("AA:BB:CC:DD:EE:FF"));
/// assert!(!is_valid_address("AA-BB-CC-DD-EE-FF"));
/// ```
pub fn is_valid_address(address: &str) -> bool {
    let bytes = address.as_bytes();
    if bytes.len() != 17 {
        return false;
    }

    bytes.iter().enumerate().all(|(i, b)| {
        if i % 3 == 2 {
            *b == b':'
        } else {
            b.is_ascii_hexdigit()
        }
    })
}

/// Normalize a device address to upper case, rejecting malformed input.
pub fn normalize_address(address: &str) -> Result<String> {
    if !is_valid_address(address) {
        return Err(Error::InvalidAddress {
            address: address.to_string(),
        });
    }
    Ok(address.to_ascii_uppercase())
}

/// Convert integer payload values to bytes by keeping the low 8 bits.
///
/// Out-of-range values wrap silently: `256` becomes `0x00` and `-1`
/// becomes `0xFF`.
///
/// # Example
///
/// ```
/// use spp_session::wrapping_bytes;
///
/// assert_eq!(wrapping_bytes(&[72, 256, -1]), vec![0x48, 0x00, 0xFF]);
/// ```
pub fn wrapping_bytes(values: &[i64]) -> Vec<u8> {
    values.iter().map(|v| *v as u8).collect()
}

/// Convert integer payload values to bytes, failing on the first value
/// outside `0..=255`.
pub fn checked_bytes(values: &[i64]) -> Result<Vec<u8>> {
    values
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            u8::try_from(value).map_err(|_| Error::InvalidByte { index, value })
        })
        .collect()
}

/// Format bytes as space separated upper case hex, e.g. `48 65 6C`.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_address("00:1a:7d:da:71:13"));
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_address("AA:BB:CC:DD:EE:FF:00"));
        assert!(!is_valid_address("GG:BB:CC:DD:EE:FF"));
        assert!(!is_valid_address("AABBCCDDEEFF00000"));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("aa:bb:cc:dd:ee:ff").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert!(matches!(
            normalize_address("not an address"),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_wrapping_bytes() {
        assert_eq!(wrapping_bytes(&[72, 101, 108, 108, 111]), b"Hello".to_vec());
        assert_eq!(wrapping_bytes(&[255, 256, 257, -1, -128]), vec![255, 0, 1, 255, 128]);
        assert!(wrapping_bytes(&[]).is_empty());
    }

    #[test]
    fn test_checked_bytes() {
        assert_eq!(checked_bytes(&[0, 127, 255]).unwrap(), vec![0, 127, 255]);

        match checked_bytes(&[1, 2, 256, -1]) {
            Err(Error::InvalidByte { index, value }) => {
                assert_eq!(index, 2);
                assert_eq!(value, 256);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(b"Hello"), "48 65 6C 6C 6F");
        assert_eq!(hex_string(&[]), "");
    }
}
