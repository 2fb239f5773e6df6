//! Instruction framing and exchange
//!
//! Frames instructions with a selectable trailer and runs fixed-length
//! request/response exchanges over a serial device or a TCP bridge.

pub mod checksum;
mod error;
mod exchange;
pub mod serial;
pub mod stream;
pub mod transport;

pub use checksum::{verify_crc16, verify_crc8, Checksum, UnknownChecksum};
pub use error::{ExchangeError, ProtocolError};
pub use exchange::{
    BypassHook, EofPolicy, ExchangeConfig, ExchangeState, Exchanger, RetryBudget,
};
pub use stream::CommunicationChannel;
pub use transport::{Connector, SystemConnector, TransportConfig, TransportEndpoint};

/// Serial device used when no TCP address is configured
pub const DEFAULT_SERIAL_PATH: &str = "/dev/ttyS0";

/// Default baud rate for the serial device
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-read timeout on the serial device in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

/// End-of-stream retries before a short read is reported
pub const DEFAULT_EOF_RETRIES: u32 = 3;

/// Pause between end-of-stream retries in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Size of each read from the transport
pub const READ_CHUNK_SIZE: usize = 128;
