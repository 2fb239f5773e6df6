//! Byte-stream channels
//!
//! Serial and TCP wrappers behind one [`CommunicationChannel`] trait.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::TcpStream;

/// Abstraction for communication channels (Serial or TCP)
///
/// A channel is opened for one exchange attempt and closed when dropped.
/// `read` returning `Ok(0)` means end of stream.
pub trait CommunicationChannel: Read + Write + Send {
    /// Short description of the remote end, used in logs
    fn describe(&self) -> String;
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

/// A serial read timeout with nothing received is reported as end of stream,
/// the same signal a closed TCP peer gives.
fn timeout_as_eof(result: io::Result<usize>) -> io::Result<usize> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
        other => other,
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        timeout_as_eof(self.port.read(buf))
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn describe(&self) -> String {
        let name = self.port.name().unwrap_or_else(|| "serial".to_string());
        match self.port.baud_rate() {
            Ok(baud) => format!("{} @ {} baud", name, baud),
            Err(_) => name,
        }
    }
}

/// TCP stream wrapper implementing CommunicationChannel
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap a connected TCP stream
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl CommunicationChannel for TcpChannel {
    fn describe(&self) -> String {
        match self.stream.peer_addr() {
            Ok(addr) => format!("tcp://{}", addr),
            Err(_) => "tcp://<disconnected>".to_string(),
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        // Peer sees EOF right away instead of waiting for the socket to linger
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
