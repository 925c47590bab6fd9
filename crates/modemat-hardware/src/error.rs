//! Error types for transport operations.
//!
//! The AT engine only needs to know whether a transport call failed and why,
//! so the variants stay coarse: mostly a closed line or an I/O failure
//! reported by the operating system.

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while talking to the modem line.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport has been closed or the device went away.
    #[error("Transport disconnected: {device}")]
    Disconnected { device: String },

    /// Transport configuration error (port name, baud rate...).
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns true if the transport cannot be used any more.
    pub fn is_disconnected(&self) -> bool {
        match self {
            Self::Disconnected { .. } => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

#[cfg(feature = "hardware-serial")]
impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::disconnected(err.description),
            serialport::ErrorKind::InvalidInput => Self::configuration(err.description),
            serialport::ErrorKind::Io(kind) => {
                Self::Io(std::io::Error::new(kind, err.description))
            }
            serialport::ErrorKind::Unknown => Self::other(err.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_error() {
        let error = TransportError::disconnected("/dev/ttyUSB2");
        assert!(error.is_disconnected());
        assert_eq!(error.to_string(), "Transport disconnected: /dev/ttyUSB2");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let error: TransportError = io.into();
        assert!(error.is_disconnected());
        assert_eq!(error.to_string(), "I/O error: pipe closed");
    }

    #[test]
    fn test_configuration_error() {
        let error = TransportError::configuration("baud rate 0");
        assert!(!error.is_disconnected());
        assert_eq!(error.to_string(), "Configuration error: baud rate 0");
    }
}
