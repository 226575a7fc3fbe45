//! Peer device descriptors.

/// A peer device as reported by the radio.
///
/// Devices are identified by address; the same device may be reported by
/// both the paired snapshot and the live scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescriptor {
    /// Display name, or [`DeviceDescriptor::UNKNOWN_NAME`].
    pub name: String,
    /// Stable device address.
    pub address: String,
}

impl DeviceDescriptor {
    /// Placeholder used when the radio does not know a device's name.
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    /// Create a descriptor, falling back to the placeholder name when
    /// `name` is missing or blank.
    pub fn new(name: Option<impl Into<String>>, address: impl Into<String>) -> Self {
        let name = name
            .map(Into::into)
            .filter(|n: &String| !n.trim().is_empty())
            .unwrap_or_else(|| Self::UNKNOWN_NAME.to_string());

        Self {
            name,
            address: address.into(),
        }
    }

    /// Create a descriptor with a known name.
    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(Some(name), address)
    }

    /// Whether the name is the placeholder.
    pub fn has_unknown_name(&self) -> bool {
        self.name == Self::UNKNOWN_NAME
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}
