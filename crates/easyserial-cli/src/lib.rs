//! easyserial command line front end
//!
//! Parses flags into an [`ExchangeConfig`], runs one exchange and renders the
//! outcome as JSON.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::time::Duration;

use easyserial_core::convert::{format_hex, parse_hex};
use easyserial_core::protocol::{
    Checksum, EofPolicy, ExchangeConfig, ExchangeError, Exchanger, TransportConfig,
    DEFAULT_BAUD_RATE, DEFAULT_EOF_RETRIES, DEFAULT_READ_TIMEOUT_MS, DEFAULT_SERIAL_PATH,
};

pub mod watchdog;

/// easyserial
#[derive(Parser, Debug, Clone)]
#[command(name = "easyserial")]
#[command(about = "Send a framed instruction to a serial device and print the reply")]
#[command(version)]
pub struct Cli {
    /// Instruction bytes in hex, e.g. "01 03 00 00"
    pub instruction: String,

    /// Trailer scheme: none, bcc, additive, crc8, crc16, crc-ccitt
    #[arg(short, long, default_value = "none")]
    pub checksum: Checksum,

    /// Number of response bytes to wait for (0 = do not read)
    #[arg(short = 'n', long, default_value_t = 0)]
    pub expect: usize,

    /// TCP bridge address (host:port); overrides the serial device
    #[arg(long, default_value = "")]
    pub tcp: String,

    /// Serial device path
    #[arg(long, default_value = DEFAULT_SERIAL_PATH)]
    pub device: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Per-read timeout on the serial device in milliseconds
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT_MS)]
    pub read_timeout_ms: u64,

    /// Report a short reply immediately instead of retrying
    #[arg(long)]
    pub strict_eof: bool,

    /// End-of-stream retries
    #[arg(long, default_value_t = DEFAULT_EOF_RETRIES)]
    pub retries: u32,

    /// Wait for the device lock instead of reporting "busy"
    #[arg(long)]
    pub wait: bool,

    /// Skip the device lock
    #[arg(long)]
    pub no_lock: bool,

    /// Exit with "timeout" after this many seconds (0 = never)
    #[arg(long, default_value_t = 10)]
    pub deadline_secs: u64,

    /// Verbose protocol logging on stderr
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Exchange settings described by the flags
    pub fn exchange_config(&self) -> ExchangeConfig {
        let transport = TransportConfig::default()
            .with_serial(self.device.clone(), self.baud)
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_tcp(self.tcp.clone());
        let policy = if self.strict_eof {
            EofPolicy::Fail
        } else {
            EofPolicy::Retry
        };
        ExchangeConfig::default()
            .with_transport(transport)
            .with_eof_policy(policy)
            .with_eof_retries(self.retries)
    }

    /// Log filter used when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "easyserial_core=trace,easyserial_cli=debug"
        } else {
            "warn"
        }
    }
}

/// Successful exchange, as printed on stdout
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Reply bytes in hex
    pub response: String,
    /// Trailer check on the reply, when the scheme supports it
    pub verified: Option<bool>,
}

/// Failed exchange, as printed on stdout
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Error message
    pub error: String,
    /// Bytes received before the stream ended, in hex
    #[serde(skip_serializing_if = "String::is_empty")]
    pub partial: String,
}

impl From<&ExchangeError> for Failure {
    fn from(err: &ExchangeError) -> Self {
        Self {
            error: err.to_string(),
            partial: format_hex(err.partial()),
        }
    }
}

/// Run the exchange the flags describe
pub fn run(cli: &Cli, engine: &Exchanger) -> Result<std::result::Result<Report, Failure>> {
    let raw = parse_hex(&cli.instruction)
        .ok_or_else(|| anyhow!("'{}' is not a hex byte string", cli.instruction))?;

    tracing::debug!(
        "{} instruction {} expecting {} bytes",
        cli.checksum,
        format_hex(&raw),
        cli.expect
    );

    match engine.exchange(&raw, cli.checksum, cli.expect) {
        Ok(response) => {
            let verified = if response.is_empty() {
                None
            } else {
                cli.checksum.verify(&response)
            };
            Ok(Ok(Report {
                response: format_hex(&response),
                verified,
            }))
        }
        Err(e) => Ok(Err(Failure::from(&e))),
    }
}

/// Parse flags from an argument list, for embedding and tests
pub fn parse_from<I, T>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).context("invalid arguments")
}
