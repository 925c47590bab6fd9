use serde::{Deserialize, Serialize};
use std::fmt;

/// Source of a modem-reported error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceErrorKind {
    /// No modem error captured.
    #[default]
    None,

    /// `+CME ERROR: <n>` (mobile equipment).
    Cme,

    /// `+CMS ERROR: <n>` (message service).
    Cms,
}

impl fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Cme => write!(f, "CME"),
            Self::Cms => write!(f, "CMS"),
        }
    }
}

/// Last error code reported by the modem itself.
///
/// The engine transports the code verbatim; mapping it to a meaning belongs
/// to the modem driver. A verbose (non-numeric) report is stored as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub code: i32,
}

impl DeviceError {
    /// Create a `+CME ERROR` record.
    #[must_use]
    pub fn cme(code: i32) -> Self {
        Self {
            kind: DeviceErrorKind::Cme,
            code,
        }
    }

    /// Create a `+CMS ERROR` record.
    #[must_use]
    pub fn cms(code: i32) -> Self {
        Self {
            kind: DeviceErrorKind::Cms,
            code,
        }
    }

    /// Returns true when a modem error has been captured.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.kind != DeviceErrorKind::None
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceErrorKind::None => write!(f, "no device error"),
            kind => write!(f, "+{kind} ERROR: {}", self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unset() {
        let err = DeviceError::default();
        assert!(!err.is_set());
        assert_eq!(err.code, 0);
        assert_eq!(err.to_string(), "no device error");
    }

    #[test]
    fn test_display_matches_wire_format() {
        assert_eq!(DeviceError::cme(108).to_string(), "+CME ERROR: 108");
        assert_eq!(DeviceError::cms(500).to_string(), "+CMS ERROR: 500");
    }

    #[test]
    fn test_serde_kind_names() {
        let json = serde_json::to_string(&DeviceError::cme(10)).unwrap();
        assert_eq!(json, r#"{"kind":"cme","code":10}"#);
    }
}
