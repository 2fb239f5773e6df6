//! Protocol errors

use thiserror::Error;

/// Errors raised by a transport during one exchange attempt
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The transport could not be opened
    #[error("Failed to open {endpoint}: {source}")]
    Open {
        /// Endpoint that was being opened
        endpoint: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The serial device rejected its line parameters
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Writing the framed instruction failed
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading the response failed for a reason other than end of stream
    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),
}

/// Outcome of an exchange that did not produce a complete response
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Fatal transport failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The stream ended before the planned length was reached and no retry
    /// was left (or retries are disabled). Carries the bytes read so far.
    #[error("End of stream after {} of {expected} bytes", .partial.len())]
    UnexpectedEof {
        /// Bytes received before the stream ended
        partial: Vec<u8>,
        /// Planned response length
        expected: usize,
    },
}

impl ExchangeError {
    /// Bytes accumulated before the failure. Empty for fatal transport errors.
    pub fn partial(&self) -> &[u8] {
        match self {
            ExchangeError::UnexpectedEof { partial, .. } => partial,
            ExchangeError::Protocol(_) => &[],
        }
    }

    /// Whether the exchange ended on end-of-stream rather than a hard failure
    pub fn is_eof(&self) -> bool {
        matches!(self, ExchangeError::UnexpectedEof { .. })
    }
}
