//! Mock transport implementation for testing and development.
//!
//! This module provides a simulated modem line that can be controlled
//! programmatically without requiring physical hardware.

pub mod transport;

pub use transport::{MockTransport, MockTransportHandle};
