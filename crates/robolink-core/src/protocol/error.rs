//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the robot controller
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Port unavailable: {port}: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("Timed out opening port {0}")]
    PortTimeout(String),

    #[error("Transport fault: {0}")]
    TransportFault(String),

    #[error("Not connected to robot")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Malformed state frame '{line}': {reason}")]
    MalformedFrame { line: String, reason: String },

    #[error("Invalid command {0:?}: expected a single uppercase ASCII letter")]
    InvalidCommand(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Classify a `serialport` failure raised while opening `port`
    pub fn from_open_error(port: &str, err: serialport::Error) -> Self {
        use serialport::ErrorKind;
        use std::io::ErrorKind as IoKind;

        match err.kind() {
            ErrorKind::NoDevice => ProtocolError::PortUnavailable {
                port: port.to_string(),
                reason: err.description,
            },
            ErrorKind::Io(IoKind::NotFound | IoKind::PermissionDenied | IoKind::AddrInUse) => {
                ProtocolError::PortUnavailable {
                    port: port.to_string(),
                    reason: err.description,
                }
            }
            ErrorKind::Io(IoKind::TimedOut) => ProtocolError::PortTimeout(port.to_string()),
            _ => ProtocolError::TransportFault(err.description),
        }
    }

    /// Whether this error happened while establishing the link
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::PortUnavailable { .. }
                | ProtocolError::PortTimeout(_)
                | ProtocolError::TransportFault(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_device_is_unavailable() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        let mapped = ProtocolError::from_open_error("/dev/ttyACM0", err);
        match mapped {
            ProtocolError::PortUnavailable { port, reason } => {
                assert_eq!(port, "/dev/ttyACM0");
                assert_eq!(reason, "gone");
            }
            other => panic!("expected PortUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_and_fault_mapping() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut),
            "slow",
        );
        assert!(matches!(
            ProtocolError::from_open_error("COM1", err),
            ProtocolError::PortTimeout(p) if p == "COM1"
        ));

        let err = serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud");
        let mapped = ProtocolError::from_open_error("COM1", err);
        assert!(matches!(mapped, ProtocolError::TransportFault(_)));
        assert!(mapped.is_open_failure());
        assert!(!ProtocolError::NotConnected.is_open_failure());
    }
}
