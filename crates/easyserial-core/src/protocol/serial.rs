//! Serial port handling
//!
//! Opens the local serial device with fixed 8N1 line parameters.

use serialport::SerialPort;
use std::io;
use std::time::Duration;

use super::ProtocolError;

/// Open a serial port for one exchange.
///
/// Line parameters are fixed at 8 data bits, no parity, 1 stop bit and no
/// flow control. `read_timeout` bounds every individual read.
pub fn open_port(
    path: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let mut port = serialport::new(path, baud_rate)
        .timeout(read_timeout)
        .open()
        .map_err(|e| ProtocolError::Open {
            endpoint: path.to_string(),
            source: io::Error::from(e),
        })?;
    configure_port(port.as_mut())?;
    Ok(port)
}

/// Apply the fixed 8N1 line parameters to an opened port
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}
