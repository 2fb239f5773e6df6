//! Exchange engine
//!
//! Runs one request/response cycle: open a transport, write the framed
//! instruction, then accumulate the response until the planned length is
//! reached. End of stream before that point is retried against a
//! [`RetryBudget`] or reported, depending on the [`EofPolicy`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::transport::{Connector, SystemConnector, TransportConfig, TransportEndpoint};
use super::{
    Checksum, ExchangeError, ProtocolError, DEFAULT_EOF_RETRIES, DEFAULT_RETRY_DELAY_MS,
    READ_CHUNK_SIZE,
};
use crate::convert::format_hex;

/// Replaces the transport round trip. Receives the framed instruction and
/// the planned response length.
pub type BypassHook = Arc<dyn Fn(&[u8], usize) -> Result<Vec<u8>, ExchangeError> + Send + Sync>;

/// What to do when the stream ends before the planned length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EofPolicy {
    /// Reopen and resend while the retry budget lasts
    #[default]
    Retry,
    /// Report the short read immediately
    Fail,
}

/// Remaining end-of-stream retries.
///
/// Clones share the same counter. The budget only ever goes down, so one
/// budget shared by every exchange of an [`Exchanger`] runs out for good
/// after enough retries. Pass a fresh budget to
/// [`Exchanger::exchange_with_budget`] for per-call accounting.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    remaining: Arc<AtomicU32>,
}

impl RetryBudget {
    /// Budget allowing `retries` end-of-stream retries
    pub fn new(retries: u32) -> Self {
        Self {
            remaining: Arc::new(AtomicU32::new(retries)),
        }
    }

    /// Retries left
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Consume one retry. Returns false once the budget is exhausted.
    pub fn try_take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_EOF_RETRIES)
    }
}

/// Exchange configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Where to send instructions
    pub transport: TransportConfig,
    /// Handling of a stream that ends early
    pub eof_policy: EofPolicy,
    /// Initial size of the engine's shared retry budget
    pub eof_retries: u32,
    /// Pause before a retry, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            eof_policy: EofPolicy::Retry,
            eof_retries: DEFAULT_EOF_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl ExchangeConfig {
    /// Replace the transport settings
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Set how an early end of stream is handled
    pub fn with_eof_policy(mut self, policy: EofPolicy) -> Self {
        self.eof_policy = policy;
        self
    }

    /// Set the size of the engine's shared retry budget
    pub fn with_eof_retries(mut self, retries: u32) -> Self {
        self.eof_retries = retries;
        self
    }

    /// Set the pause before each retry
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Exchange state, reported in trace logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Opening the transport
    Opening,
    /// Writing the framed instruction
    Writing,
    /// Accumulating the response
    Reading,
    /// Waiting before another attempt
    Retrying,
    /// Response complete
    Complete,
    /// Exchange gave up
    Failed,
}

/// How a single attempt ended, short of a hard failure
enum Attempt {
    Complete(Vec<u8>),
    EndOfStream(Vec<u8>),
}

/// Sends framed instructions and collects fixed-length responses
pub struct Exchanger {
    config: RwLock<ExchangeConfig>,
    retry_budget: RetryBudget,
    connector: Arc<dyn Connector>,
    bypass: RwLock<Option<BypassHook>>,
}

impl Default for Exchanger {
    fn default() -> Self {
        Self::new(ExchangeConfig::default())
    }
}

impl Exchanger {
    /// Create an engine that opens real serial ports and sockets
    pub fn new(config: ExchangeConfig) -> Self {
        Self::with_connector(config, Arc::new(SystemConnector))
    }

    /// Create an engine with a custom way of opening channels
    pub fn with_connector(config: ExchangeConfig, connector: Arc<dyn Connector>) -> Self {
        let retry_budget = RetryBudget::new(config.eof_retries);
        Self {
            config: RwLock::new(config),
            retry_budget,
            connector,
            bypass: RwLock::new(None),
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ExchangeConfig {
        self.config.read().clone()
    }

    /// Replace the transport settings. Takes effect on the next attempt.
    pub fn set_transport(&self, transport: TransportConfig) {
        self.config.write().transport = transport;
    }

    /// Replace the end-of-stream policy. Takes effect on the next exchange.
    pub fn set_eof_policy(&self, policy: EofPolicy) {
        self.config.write().eof_policy = policy;
    }

    /// The budget used by [`Exchanger::exchange`]
    pub fn retry_budget(&self) -> &RetryBudget {
        &self.retry_budget
    }

    /// Route every exchange through `hook` instead of a transport
    pub fn install_bypass<F>(&self, hook: F)
    where
        F: Fn(&[u8], usize) -> Result<Vec<u8>, ExchangeError> + Send + Sync + 'static,
    {
        *self.bypass.write() = Some(Arc::new(hook));
    }

    /// Remove the bypass hook and talk to the transport again
    pub fn clear_bypass(&self) {
        *self.bypass.write() = None;
    }

    /// Send `raw` unframed and read `planned_len` bytes
    pub fn send_with_no_checksum(
        &self,
        raw: &[u8],
        planned_len: usize,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange(raw, Checksum::None, planned_len)
    }

    /// Send `raw` with a BCC trailer and read `planned_len` bytes
    pub fn send_with_bcc(
        &self,
        raw: &[u8],
        planned_len: usize,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange(raw, Checksum::Bcc, planned_len)
    }

    /// Send `raw` with an additive trailer and read `planned_len` bytes
    pub fn send_with_additive(
        &self,
        raw: &[u8],
        planned_len: usize,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange(raw, Checksum::Additive, planned_len)
    }

    /// Send `raw` with a CRC-8 trailer and read `planned_len` bytes
    pub fn send_with_crc8(
        &self,
        raw: &[u8],
        planned_len: usize,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange(raw, Checksum::Crc8, planned_len)
    }

    /// Send `raw` with a CRC-16 trailer and read `planned_len` bytes
    pub fn send_with_crc16(
        &self,
        raw: &[u8],
        planned_len: usize,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange(raw, Checksum::Crc16, planned_len)
    }

    /// Send `raw` with a CRC-CCITT trailer and read `planned_len` bytes
    pub fn send_with_crc_ccitt(
        &self,
        raw: &[u8],
        planned_len: usize,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange(raw, Checksum::CrcCcitt, planned_len)
    }

    /// Frame `raw`, send it and read `planned_len` response bytes.
    ///
    /// Retries draw from the engine's shared budget.
    pub fn exchange(
        &self,
        raw: &[u8],
        checksum: Checksum,
        planned_len: usize,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange_with_budget(raw, checksum, planned_len, &self.retry_budget)
    }

    /// Same as [`Exchanger::exchange`], drawing retries from `budget`
    pub fn exchange_with_budget(
        &self,
        raw: &[u8],
        checksum: Checksum,
        planned_len: usize,
        budget: &RetryBudget,
    ) -> Result<Vec<u8>, ExchangeError> {
        let hook = self.bypass.read().clone();
        if let Some(hook) = hook {
            let framed = checksum.apply(raw, true);
            debug!(
                "bypass: {} framed = {}, planned_len = {}",
                checksum,
                format_hex(&framed),
                planned_len
            );
            return hook(&framed, planned_len);
        }

        loop {
            let (endpoint, policy, delay) = {
                let config = self.config.read();
                (config.transport.endpoint(), config.eof_policy, config.retry_delay())
            };

            let partial = match self.attempt(&endpoint, raw, checksum, planned_len) {
                Ok(Attempt::Complete(response)) => {
                    trace!(
                        state = ?ExchangeState::Complete,
                        "{} bytes from {}",
                        response.len(),
                        endpoint
                    );
                    return Ok(response);
                }
                Ok(Attempt::EndOfStream(partial)) => partial,
                Err(e) => {
                    trace!(state = ?ExchangeState::Failed, "{}: {}", endpoint, e);
                    return Err(e.into());
                }
            };

            if policy == EofPolicy::Retry && budget.try_take() {
                warn!(
                    state = ?ExchangeState::Retrying,
                    "end of stream after {} of {} bytes from {}, retrying in {}ms ({} left)",
                    partial.len(),
                    planned_len,
                    endpoint,
                    delay.as_millis(),
                    budget.remaining()
                );
                thread::sleep(delay);
                continue;
            }

            debug!(
                state = ?ExchangeState::Failed,
                "end of stream after {} of {} bytes from {}",
                partial.len(),
                planned_len,
                endpoint
            );
            return Err(ExchangeError::UnexpectedEof {
                partial,
                expected: planned_len,
            });
        }
    }

    /// One open/write/read cycle. The channel is closed when it drops at the
    /// end of this call, whatever the outcome.
    fn attempt(
        &self,
        endpoint: &TransportEndpoint,
        raw: &[u8],
        checksum: Checksum,
        planned_len: usize,
    ) -> Result<Attempt, ProtocolError> {
        trace!(state = ?ExchangeState::Opening, "{}", endpoint);
        let mut channel = self.connector.open(endpoint)?;

        let framed = checksum.apply(raw, true);
        trace!(state = ?ExchangeState::Writing, "{}", channel.describe());
        debug!("send {} bytes: {}", framed.len(), format_hex(&framed));
        channel.write_all(&framed).map_err(ProtocolError::Write)?;

        if planned_len == 0 {
            return Ok(Attempt::Complete(Vec::new()));
        }

        trace!(state = ?ExchangeState::Reading, "expecting {} bytes", planned_len);
        let mut response = Vec::with_capacity(planned_len);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match channel.read(&mut chunk) {
                Ok(0) => return Ok(Attempt::EndOfStream(response)),
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    debug!(
                        "read {} bytes, total = {}: {}",
                        n,
                        response.len(),
                        format_hex(&chunk[..n])
                    );
                    if response.len() >= planned_len {
                        return Ok(Attempt::Complete(response));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(Attempt::EndOfStream(response))
                }
                Err(e) => return Err(ProtocolError::Read(e)),
            }
        }
    }
}
