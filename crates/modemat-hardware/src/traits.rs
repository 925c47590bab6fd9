//! Transport trait definition.
//!
//! The AT engine drives a modem through a character stream it does not own:
//! a UART, a USB CDC port, a multiplexer channel or a test double. This module
//! defines the contract between the engine and such a stream.
//!
//! The trait is synchronous and object-safe. The engine performs bounded,
//! blocking waits under its own lock, so methods take `&self` and the
//! implementation is responsible for its own interior synchronisation.

use std::time::Duration;

use crate::error::Result;
use crate::types::PollEvents;

/// A bidirectional, non-blocking byte stream to a modem.
///
/// Implementations must be `Send + Sync`: an `Arc<dyn Transport>` is shared
/// between every caller of one engine instance and the out-of-band pump.
///
/// # Examples
///
/// ```
/// use modemat_hardware::mock::MockTransport;
/// use modemat_hardware::{PollEvents, Transport};
/// use std::time::Duration;
///
/// let (transport, handle) = MockTransport::new();
/// handle.push(b"OK\r\n");
///
/// let ready = transport.poll(PollEvents::READABLE, Duration::from_millis(10)).unwrap();
/// assert!(ready.is_readable());
///
/// let mut buf = [0u8; 8];
/// let n = transport.read(&mut buf).unwrap();
/// assert_eq!(&buf[..n], b"OK\r\n");
/// ```
pub trait Transport: Send + Sync {
    /// Write as many bytes of `buf` as the line accepts right now.
    ///
    /// Returns the number of bytes accepted, which may be less than
    /// `buf.len()`.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Read whatever is available into `buf`.
    ///
    /// Returns `Ok(0)` when no data is available yet. Must not block.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Wait up to `timeout` for any of `events` to become ready.
    ///
    /// Returns the subset of `events` that is ready, which is empty on
    /// timeout.
    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<PollEvents>;

    /// Name used in log messages.
    fn name(&self) -> &str {
        "transport"
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<PollEvents> {
        (**self).poll(events, timeout)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
