use thiserror::Error;

use crate::types::DeviceError;

/// Broad classification of an [`AtError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure, malformed or failed response, timeout.
    Device,

    /// Invalid arguments passed to an operation.
    Parameter,
}

/// Errors recorded by the AT engine.
///
/// The engine keeps the first error of a locked sequence ("sticky"), so the
/// type is `Clone` and carries transport failures as text rather than the
/// original `io::Error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AtError {
    // Device errors
    #[error("AT timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Short write: {written} of {expected} bytes accepted")]
    ShortWrite { written: usize, expected: usize },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Modem returned ERROR")]
    ErrorResult,

    #[error("Modem reported {0}")]
    Modem(DeviceError),

    #[error("Receive buffer overflow")]
    Overflow,

    #[error("Transport is not usable")]
    Unusable,

    // Parameter errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AtError {
    /// Create a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_) | Self::Config(_) => ErrorKind::Parameter,
            _ => ErrorKind::Device,
        }
    }

    /// Returns true for device-side failures (including modem reports).
    pub fn is_device_error(&self) -> bool {
        self.kind() == ErrorKind::Device
    }

    /// Modem error code carried by this error, if any.
    pub fn device_error(&self) -> Option<DeviceError> {
        match self {
            Self::Modem(err) => Some(*err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AtError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AtError::timeout(1000), "AT timeout after 1000ms")]
    #[case(AtError::ErrorResult, "Modem returned ERROR")]
    #[case(AtError::Modem(DeviceError::cme(108)), "Modem reported +CME ERROR: 108")]
    #[case(
        AtError::ShortWrite { written: 2, expected: 8 },
        "Short write: 2 of 8 bytes accepted"
    )]
    #[case(AtError::invalid_parameter("empty prefix"), "Invalid parameter: empty prefix")]
    fn test_error_display(#[case] error: AtError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case(AtError::timeout(5), ErrorKind::Device)]
    #[case(AtError::transport("closed"), ErrorKind::Device)]
    #[case(AtError::Overflow, ErrorKind::Device)]
    #[case(AtError::Modem(DeviceError::cms(1)), ErrorKind::Device)]
    #[case(AtError::invalid_parameter("x"), ErrorKind::Parameter)]
    #[case(AtError::config("x"), ErrorKind::Parameter)]
    fn test_error_kind(#[case] error: AtError, #[case] kind: ErrorKind) {
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn test_device_error_extraction() {
        let err = AtError::Modem(DeviceError::cme(30));
        assert_eq!(err.device_error(), Some(DeviceError::cme(30)));
        assert_eq!(AtError::ErrorResult.device_error(), None);
    }
}
