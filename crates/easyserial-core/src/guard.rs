//! Device-busy lock
//!
//! Processes talking to the same device coordinate by binding a fixed local
//! TCP port. Whoever holds the bind owns the device; dropping the
//! [`DeviceLock`] releases it.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Address bound while a process owns the device
pub const DEFAULT_LOCK_ADDR: &str = "127.0.0.1:53485";

/// Interval between bind attempts while waiting
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Device lock errors
#[derive(Error, Debug)]
pub enum GuardError {
    /// Another process holds the lock
    #[error("Device busy: {0} is held by another process")]
    Busy(SocketAddr),

    /// The lock address is not a socket address
    #[error("Invalid lock address '{0}'")]
    InvalidAddress(String),

    /// Binding failed for a reason other than the port being taken
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// Held advisory lock on the device
#[derive(Debug)]
pub struct DeviceLock {
    listener: TcpListener,
}

impl DeviceLock {
    /// Take the lock on [`DEFAULT_LOCK_ADDR`].
    ///
    /// With `wait`, keeps retrying once per second until the port is free.
    /// Otherwise fails with [`GuardError::Busy`] straight away.
    pub fn acquire(wait: bool) -> Result<Self, GuardError> {
        Self::acquire_at(DEFAULT_LOCK_ADDR, wait, LOCK_POLL_INTERVAL)
    }

    /// Take the lock on a specific address
    pub fn acquire_at(addr: &str, wait: bool, poll: Duration) -> Result<Self, GuardError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| GuardError::InvalidAddress(addr.to_string()))?;
        loop {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    debug!("device lock acquired on {}", addr);
                    return Ok(Self { listener });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    if !wait {
                        return Err(GuardError::Busy(addr));
                    }
                    debug!("device lock {} busy, waiting", addr);
                    thread::sleep(poll);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Address the lock is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
