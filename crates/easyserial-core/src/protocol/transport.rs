//! Transport selection
//!
//! A configured TCP address (usually a serial-to-TCP bridge) takes priority
//! over the local serial device. The configuration is resolved into a
//! [`TransportEndpoint`] for every exchange attempt, and a [`Connector`] opens
//! a fresh channel for it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::TcpStream;
use std::time::Duration;

use super::serial::open_port;
use super::stream::{CommunicationChannel, SerialChannel, TcpChannel};
use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, DEFAULT_SERIAL_PATH};

/// Transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP `host:port` to dial instead of the serial device. Empty = disabled.
    pub tcp_address: String,
    /// Serial device path
    pub serial_path: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Per-read timeout on the serial device in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_address: String::new(),
            serial_path: DEFAULT_SERIAL_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    /// Route exchanges through a TCP bridge
    pub fn with_tcp(mut self, address: impl Into<String>) -> Self {
        self.tcp_address = address.into();
        self
    }

    /// Use a local serial device
    pub fn with_serial(mut self, path: impl Into<String>, baud_rate: u32) -> Self {
        self.serial_path = path.into();
        self.baud_rate = baud_rate;
        self
    }

    /// Bound each serial read by `timeout`
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Resolve which endpoint the next exchange should use
    pub fn endpoint(&self) -> TransportEndpoint {
        if self.tcp_address.is_empty() {
            TransportEndpoint::Serial {
                path: self.serial_path.clone(),
                baud: self.baud_rate,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
            }
        } else {
            TransportEndpoint::Tcp {
                address: self.tcp_address.clone(),
            }
        }
    }
}

/// A concrete place to open a channel to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEndpoint {
    /// Dial a TCP address
    Tcp {
        /// `host:port` of the bridge
        address: String,
    },
    /// Open a local serial device
    Serial {
        /// Device path
        path: String,
        /// Baud rate
        baud: u32,
        /// Bound on each individual read
        read_timeout: Duration,
    },
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEndpoint::Tcp { address } => write!(f, "tcp://{}", address),
            TransportEndpoint::Serial { path, baud, .. } => write!(f, "{} @ {} baud", path, baud),
        }
    }
}

/// Opens a channel for one exchange attempt
pub trait Connector: Send + Sync {
    /// Open a fresh channel to `endpoint`
    fn open(
        &self,
        endpoint: &TransportEndpoint,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError>;
}

/// Connector backed by real sockets and serial devices
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn open(
        &self,
        endpoint: &TransportEndpoint,
    ) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        match endpoint {
            TransportEndpoint::Tcp { address } => {
                let stream =
                    TcpStream::connect(address.as_str()).map_err(|e| ProtocolError::Open {
                        endpoint: endpoint.to_string(),
                        source: e,
                    })?;
                Ok(Box::new(TcpChannel::new(stream)))
            }
            TransportEndpoint::Serial {
                path,
                baud,
                read_timeout,
            } => {
                let port = open_port(path, *baud, *read_timeout)?;
                Ok(Box::new(SerialChannel::new(port)))
            }
        }
    }
}
