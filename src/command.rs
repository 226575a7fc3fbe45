//! Method-call command surface.
//!
//! An application layer talks to the manager with named methods:
//!
//! | Method       | Arguments | Reply                  |
//! |--------------|-----------|------------------------|
//! | `scan`       | —         | list of devices        |
//! | `connect`    | `address` | `true`                 |
//! | `disconnect` | —         | `true`                 |
//! | `send`       | `data`    | `true`                 |
//!
//! Failures are reported as [`Error`] values, whose [`Error::code`] is
//! stable across the boundary.

use tracing::debug;

use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::manager::SppManager;
use crate::radio::Radio;

/// A raw method call as received from the application layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodCall {
    /// Method name.
    pub method: String,
    /// Device address, for `connect`.
    pub address: Option<String>,
    /// Payload values, for `send`.
    pub data: Option<Vec<i64>>,
}

impl MethodCall {
    /// Create a call with no arguments.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    /// Attach an address argument.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Attach a data argument.
    pub fn with_data(mut self, data: impl Into<Vec<i64>>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scan for devices.
    Scan,
    /// Connect to a device.
    Connect {
        /// Address of the device.
        address: String,
    },
    /// Close the connection.
    Disconnect,
    /// Write payload values.
    Send {
        /// Values to send, one byte each.
        data: Vec<i64>,
    },
}

impl Command {
    /// The method name of this command.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::Send { .. } => "send",
        }
    }
}

impl TryFrom<MethodCall> for Command {
    type Error = Error;

    fn try_from(call: MethodCall) -> Result<Self> {
        match call.method.as_str() {
            "scan" => Ok(Self::Scan),
            "connect" => {
                let address = call
                    .address
                    .ok_or(Error::MissingArgument { name: "address" })?;
                Ok(Self::Connect { address })
            }
            "disconnect" => Ok(Self::Disconnect),
            "send" => {
                let data = call.data.ok_or(Error::MissingArgument { name: "data" })?;
                Ok(Self::Send { data })
            }
            _ => Err(Error::NotImplemented {
                method: call.method,
            }),
        }
    }
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Reply {
    /// Devices found by a scan.
    Devices(Vec<DeviceDescriptor>),
    /// Outcome flag of connect, disconnect and send.
    Success(bool),
}

impl<R: Radio> SppManager<R> {
    /// Run a parsed command.
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        debug!("Executing {} command", command.method());

        match command {
            Command::Scan => self.scan().await.map(Reply::Devices),
            Command::Connect { address } => {
                self.connect(&address).await?;
                Ok(Reply::Success(true))
            }
            Command::Disconnect => {
                self.disconnect().await;
                Ok(Reply::Success(true))
            }
            Command::Send { data } => {
                self.send_values(&data).await?;
                Ok(Reply::Success(true))
            }
        }
    }

    /// Parse and run a method call.
    pub async fn dispatch(&self, call: MethodCall) -> Result<Reply> {
        let command = Command::try_from(call)?;
        self.execute(command).await
    }
}
