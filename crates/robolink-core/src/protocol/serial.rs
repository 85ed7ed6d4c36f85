//! Serial port handling
//!
//! Provides low-level serial port access for the robot controller.

use serialport::SerialPort;
use std::time::Duration;

use super::{ConnectionConfig, ProtocolError};

/// Open a serial port with the controller's line settings (8 data bits,
/// no parity, two stop bits)
pub fn open_port(
    name: &str,
    config: &ConnectionConfig,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    tracing::debug!(port = name, baud = config.baud_rate, "opening serial port");

    serialport::new(name, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::Two)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(config.read_timeout_ms))
        .open()
        .map_err(|e| ProtocolError::from_open_error(name, e))
}

/// Re-apply the line settings; some drivers ignore the builder values
pub fn configure_port(port: &mut dyn SerialPort, name: &str) -> Result<(), ProtocolError> {
    let fault = |e: serialport::Error| ProtocolError::from_open_error(name, e);

    port.set_data_bits(serialport::DataBits::Eight).map_err(fault)?;
    port.set_parity(serialport::Parity::None).map_err(fault)?;
    port.set_stop_bits(serialport::StopBits::Two).map_err(fault)?;
    port.set_flow_control(serialport::FlowControl::None).map_err(fault)?;

    // Keep DTR asserted so Arduino-style boards are not reset mid-session
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!(port = name, "failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::TransportFault(e.to_string()))
}
