//! # easyserial core library
//!
//! Request/response framing for simple serial-line instruction protocols.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Trailer framing (BCC, additive, CRC-8, CRC-16, CRC-CCITT) and verification
//! - Fixed-length exchanges over a serial device or a TCP bridge
//! - End-of-stream retry handling
//! - A local-port advisory lock for sharing one device between processes
//!
//! ## Example
//!
//! ```rust,no_run
//! use easyserial_core::protocol::{ExchangeConfig, Exchanger, TransportConfig};
//!
//! let config = ExchangeConfig::default()
//!     .with_transport(TransportConfig::default().with_serial("/dev/ttyUSB0", 9600));
//! let engine = Exchanger::new(config);
//!
//! // Status query for station 0x01, device answers with 6 bytes
//! let reply = engine.send_with_crc16(&[0x01, 0x53], 6)?;
//! println!("{:02x?}", reply);
//! # Ok::<(), easyserial_core::protocol::ExchangeError>(())
//! ```

pub mod convert;
pub mod guard;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::convert::{bytes_to_num, display_to_string, split_u16};
    pub use crate::guard::{DeviceLock, GuardError};
    pub use crate::protocol::{
        verify_crc16, verify_crc8, Checksum, EofPolicy, ExchangeConfig, ExchangeError,
        Exchanger, ProtocolError, RetryBudget, TransportConfig,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
