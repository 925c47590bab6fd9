//! Transport abstraction layer for the modemat AT engine.
//!
//! This crate defines the byte-stream contract the AT engine drives
//! ([`Transport`]) along with the implementations shipped with the workspace:
//!
//! - [`mock::MockTransport`], a scriptable modem line for tests and
//!   development, controlled through a [`mock::MockTransportHandle`].
//! - `SerialTransport`, a real serial port (feature `hardware-serial`).
//!
//! # Design
//!
//! - **Synchronous**: the engine performs bounded blocking waits under its
//!   own lock, so the trait is plain `fn` with explicit poll timeouts.
//! - **Object-safe**: engines hold an `Arc<dyn Transport>`.
//! - **Thread-safe**: implementations are `Send + Sync` and synchronise
//!   internally; every method takes `&self`.
//!
//! # Example
//!
//! ```
//! use modemat_hardware::mock::MockTransport;
//! use modemat_hardware::{PollEvents, Transport};
//! use std::time::Duration;
//!
//! let (transport, modem) = MockTransport::new();
//! modem.respond("ATE0", ["OK\r\n"]);
//!
//! transport.write(b"ATE0\r\n")?;
//! let ready = transport.poll(PollEvents::READABLE, Duration::from_millis(50))?;
//! assert!(ready.is_readable());
//! # Ok::<(), modemat_hardware::TransportError>(())
//! ```

pub mod error;
pub mod mock;
#[cfg(feature = "hardware-serial")]
pub mod serial;
pub mod traits;
pub mod types;

pub use error::{Result, TransportError};
#[cfg(feature = "hardware-serial")]
pub use serial::{SerialConfig, SerialTransport};
pub use traits::Transport;
pub use types::PollEvents;
