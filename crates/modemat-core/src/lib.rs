pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{AtConfig, UrcPriority};
pub use error::{AtError, ErrorKind, Result};
pub use types::{DeviceError, DeviceErrorKind};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
