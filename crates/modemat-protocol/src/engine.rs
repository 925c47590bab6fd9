//! AT engine state and transport plumbing.
//!
//! [`AtEngine`] is the state of one AT channel: receive buffer, stop tags,
//! timeouts, sticky error and URC registry. It is never used directly by
//! callers; an [`AtHandler`](crate::AtHandler) owns it behind a mutex and
//! hands it out through an [`AtSession`](crate::AtSession).
//!
//! # Sticky errors
//!
//! The first error of a locked sequence is kept. Every field operation after
//! it is a no-op returning its failure sentinel (`None`, `false`, or the
//! unchanged builder) until [`AtEngine::clear_error`] runs, so a caller can
//! issue a whole command and check the outcome once:
//!
//! ```
//! use modemat_core::AtConfig;
//! use modemat_hardware::mock::MockTransport;
//! use modemat_protocol::AtHandler;
//! use std::sync::Arc;
//!
//! let (transport, modem) = MockTransport::new();
//! modem.respond("AT+CSQ", ["\r\n+CSQ: 21,99\r\n\r\nOK\r\n"]);
//!
//! let handler = AtHandler::new(Arc::new(transport), AtConfig::default())?;
//! let mut at = handler.lock();
//! at.cmd_start("+CSQ").cmd_stop();
//! at.resp_start(Some("+CSQ:"));
//! let rssi = at.read_int();
//! let ber = at.read_int();
//! at.resp_stop();
//! at.unlock()?;
//!
//! assert_eq!((rssi, ber), (Some(21), Some(99)));
//! # Ok::<(), modemat_core::AtError>(())
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use modemat_core::{AtConfig, AtError, DeviceError, Result, UrcPriority};
use modemat_hardware::{PollEvents, Transport, TransportError};
use tracing::{debug, trace, warn};

use crate::buffer::RxBuffer;
use crate::matcher::StopTags;
use crate::scanner::RowState;
use crate::timeout::{Clock, TimeoutState};
use crate::urc::UrcRegistry;

/// Scratch size used while draining the transport in `flush`.
const DRAIN_CHUNK: usize = 64;

/// State of one AT channel.
pub struct AtEngine {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) buffer: RxBuffer,
    pub(crate) tags: StopTags,
    pub(crate) urcs: UrcRegistry,

    // Response scanner
    pub(crate) row: RowState,
    pub(crate) prefix: Option<Vec<u8>>,
    pub(crate) check_urc: bool,
    pub(crate) urc_priority: UrcPriority,

    // Command builder
    pub(crate) cmd_first_param: bool,
    pub(crate) delimiter: u8,
    pub(crate) default_delimiter: u8,
    pub(crate) output_delimiter: Vec<u8>,
    pub(crate) send_delay: Duration,
    pub(crate) last_response_stop: Option<Instant>,

    // Timing
    pub(crate) timeout: TimeoutState,
    pub(crate) urc_timeout: Duration,
    poll_slice: Duration,
    pub(crate) clock: Clock,

    error: Option<AtError>,
    device_error: DeviceError,
    debug: bool,
    usable: bool,
}

impl std::fmt::Debug for AtEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtEngine")
            .field("transport", &self.transport.name())
            .field("buffered", &self.buffer.len())
            .field("scope", &self.row.scope)
            .field("timeout", &self.timeout.current())
            .field("error", &self.error)
            .field("device_error", &self.device_error)
            .field("urc_handlers", &self.urcs.len())
            .finish_non_exhaustive()
    }
}

impl AtEngine {
    /// Create an engine from a validated configuration.
    pub(crate) fn new(transport: Arc<dyn Transport>, config: &AtConfig) -> Self {
        let delimiter = config.delimiter_byte();
        Self {
            transport,
            buffer: RxBuffer::new(config.buffer_size),
            tags: StopTags::default(),
            urcs: UrcRegistry::default(),
            row: RowState::default(),
            prefix: None,
            check_urc: true,
            urc_priority: config.urc_priority,
            cmd_first_param: true,
            delimiter,
            default_delimiter: delimiter,
            output_delimiter: config.output_delimiter.as_bytes().to_vec(),
            send_delay: config.send_delay(),
            last_response_stop: None,
            timeout: TimeoutState::new(config.timeout()),
            urc_timeout: config.urc_timeout(),
            poll_slice: config.poll_slice(),
            clock: Clock::start(),
            error: None,
            device_error: DeviceError::default(),
            debug: config.debug,
            usable: true,
        }
    }

    /// Name of the underlying transport.
    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    // ------------------------------------------------------------------------
    // Error state
    // ------------------------------------------------------------------------

    /// First error recorded since the last [`clear_error`](Self::clear_error).
    pub fn last_error(&self) -> Option<&AtError> {
        self.error.as_ref()
    }

    /// Last error code reported by the modem (`+CME ERROR` / `+CMS ERROR`).
    pub fn last_device_error(&self) -> DeviceError {
        self.device_error
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.device_error = DeviceError::default();
    }

    /// Record `error` unless an earlier one is pending.
    pub fn set_error(&mut self, error: AtError) {
        if self.error.is_none() {
            trace!(transport = self.transport.name(), %error, "AT error recorded");
            self.error = Some(error);
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<AtError> {
        self.error.take()
    }

    pub(crate) fn set_device_error(&mut self, error: DeviceError) {
        self.device_error = error;
    }

    /// Run `op` unless an error is pending; record its failure.
    pub(crate) fn sticky<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Option<R> {
        if self.error.is_some() {
            return None;
        }
        match op(self) {
            Ok(value) => Some(value),
            Err(error) => {
                self.set_error(error);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    /// Change the AT timeout. See [`TimeoutState`] for the sticky rules.
    pub fn set_at_timeout(&mut self, timeout: Duration, sticky: bool) {
        self.timeout.set(timeout, sticky);
    }

    pub fn restore_at_timeout(&mut self) {
        self.timeout.restore();
    }

    pub fn at_timeout(&self) -> Duration {
        self.timeout.current()
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// While false every wait fails at once with [`AtError::Unusable`].
    pub fn set_is_filehandle_usable(&mut self, usable: bool) {
        self.usable = usable;
    }

    pub fn is_filehandle_usable(&self) -> bool {
        self.usable
    }

    pub fn set_delimiter(&mut self, delimiter: u8) {
        self.delimiter = delimiter;
    }

    pub fn set_default_delimiter(&mut self) {
        self.delimiter = self.default_delimiter;
    }

    pub fn set_output_delimiter(&mut self, delimiter: &str) {
        self.output_delimiter = delimiter.as_bytes().to_vec();
    }

    /// Minimum gap between the end of a response and the next command.
    pub fn set_send_delay(&mut self, delay: Duration) {
        self.send_delay = delay;
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Prepare for a new locked sequence.
    pub(crate) fn begin_session(&mut self) {
        self.clear_error();
        self.clock.restart();
    }

    /// Restart the deadline clock with the current timeout.
    pub(crate) fn restart_clock(&mut self) {
        self.clock.restart();
    }

    /// Bring the engine back to a known state after a caller panicked while
    /// holding the lock.
    pub(crate) fn recover(&mut self) {
        warn!(
            transport = self.transport.name(),
            "AT lock poisoned, resetting engine state"
        );
        self.buffer.clear();
        self.reset_response_state();
        self.delimiter = self.default_delimiter;
        self.cmd_first_param = true;
        self.timeout.restore();
        self.clear_error();
    }

    /// Drop URC handlers and buffered data once the last user is gone.
    pub(crate) fn detach(&mut self) {
        self.urcs.clear();
        self.buffer.release();
        self.reset_response_state();
    }

    /// Drop buffered bytes and drain whatever the transport holds.
    pub fn flush(&mut self) {
        self.buffer.clear();
        self.tags.reset();
        if !self.usable {
            return;
        }

        let mut scratch = [0u8; DRAIN_CHUNK];
        loop {
            let ready = match self.transport.poll(PollEvents::READABLE, Duration::ZERO) {
                Ok(ready) => ready,
                Err(err) => {
                    debug!(transport = self.transport.name(), error = %err, "Flush poll failed");
                    break;
                }
            };
            if !ready.is_readable() {
                break;
            }
            match self.transport.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => {
                    if self.debug {
                        debug!(
                            transport = self.transport.name(),
                            "AT flush <{}",
                            scratch[..n].escape_ascii()
                        );
                    }
                }
                Err(err) => {
                    debug!(transport = self.transport.name(), error = %err, "Flush read failed");
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------------

    pub(crate) fn transport_error(&self, err: TransportError) -> AtError {
        warn!(transport = self.transport.name(), error = %err, "AT transport failure");
        AtError::transport(err.to_string())
    }

    pub(crate) fn timeout_error(&self) -> AtError {
        let timeout_ms = u64::try_from(self.timeout.current().as_millis()).unwrap_or(u64::MAX);
        warn!(transport = self.transport.name(), timeout_ms, "AT timeout");
        AtError::timeout(timeout_ms)
    }

    /// Read more bytes into the buffer.
    ///
    /// With `wait`, polls in slices until data arrives or the deadline
    /// passes; otherwise checks once. Returns false when nothing was read.
    pub(crate) fn fill_buffer(&mut self, wait: bool) -> Result<bool> {
        if !self.usable {
            return Err(AtError::Unusable);
        }
        if self.buffer.is_full() {
            warn!(
                transport = self.transport.name(),
                capacity = self.buffer.capacity(),
                "AT receive buffer overflow, dropping buffered data"
            );
            self.buffer.clear();
            return Err(AtError::Overflow);
        }

        loop {
            let remaining = self.clock.remaining(self.timeout.current());
            let slice = if wait {
                remaining.min(self.poll_slice)
            } else {
                Duration::ZERO
            };

            let ready = self
                .transport
                .poll(PollEvents::READABLE, slice)
                .map_err(|err| self.transport_error(err))?;

            if ready.is_readable() {
                let transport = &self.transport;
                let read = self.buffer.fill_with(|free| transport.read(free));
                let n = read.map_err(|err| self.transport_error(err))?;
                if n > 0 {
                    if self.debug {
                        let unread = self.buffer.unread();
                        debug!(
                            transport = self.transport.name(),
                            "AT RX <{}",
                            unread[unread.len() - n..].escape_ascii()
                        );
                    }
                    return Ok(true);
                }
            }

            if !wait || remaining.is_zero() {
                return Ok(false);
            }
        }
    }

    /// Peek the next byte, refilling as needed.
    pub(crate) fn peek_byte(&mut self) -> Result<u8> {
        loop {
            if let Some(byte) = self.buffer.peek() {
                return Ok(byte);
            }
            if !self.fill_buffer(true)? {
                return Err(self.timeout_error());
            }
        }
    }

    /// Consume the next byte, refilling as needed.
    pub(crate) fn next_byte(&mut self) -> Result<u8> {
        loop {
            if let Some(byte) = self.buffer.next_byte() {
                return Ok(byte);
            }
            if !self.fill_buffer(true)? {
                return Err(self.timeout_error());
            }
        }
    }

    /// Check whether the unread data starts with `literal`, refilling until
    /// the answer is known. Consumes nothing.
    ///
    /// Returns false on mismatch, when the deadline passes first, or when the
    /// literal cannot fit in the free space.
    pub(crate) fn match_literal(&mut self, literal: &[u8]) -> Result<bool> {
        loop {
            let unread = self.buffer.unread();
            let n = unread.len().min(literal.len());
            if unread[..n] != literal[..n] {
                return Ok(false);
            }
            if n == literal.len() {
                return Ok(true);
            }
            if self.buffer.is_full() || !self.fill_buffer(true)? {
                return Ok(false);
            }
        }
    }

    /// Consume through the next `\n`.
    pub(crate) fn skip_line(&mut self) -> Result<()> {
        while self.next_byte()? != b'\n' {}
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Transmit path
    // ------------------------------------------------------------------------

    /// Write all of `data` in one transport write.
    ///
    /// Waits for writability until the deadline; a partial write is an
    /// error and is not retried.
    pub(crate) fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.usable {
            return Err(AtError::Unusable);
        }

        loop {
            let remaining = self.clock.remaining(self.timeout.current());
            let ready = self
                .transport
                .poll(PollEvents::WRITABLE, remaining.min(self.poll_slice))
                .map_err(|err| self.transport_error(err))?;
            if ready.is_writable() {
                break;
            }
            if remaining.is_zero() {
                return Err(self.timeout_error());
            }
        }

        let written = self
            .transport
            .write(data)
            .map_err(|err| self.transport_error(err))?;
        if self.debug {
            debug!(
                transport = self.transport.name(),
                "AT TX >{}",
                data[..written.min(data.len())].escape_ascii()
            );
        }
        if written < data.len() {
            warn!(
                transport = self.transport.name(),
                written,
                expected = data.len(),
                "AT short write"
            );
            return Err(AtError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Sleep until the configured gap after the previous response passed.
    pub(crate) fn wait_send_delay(&self) {
        if self.send_delay.is_zero() {
            return;
        }
        if let Some(stopped) = self.last_response_stop {
            let elapsed = stopped.elapsed();
            if elapsed < self.send_delay {
                thread::sleep(self.send_delay - elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modemat_hardware::mock::{MockTransport, MockTransportHandle};

    fn engine(config: AtConfig) -> (AtEngine, MockTransportHandle) {
        let (transport, modem) = MockTransport::new();
        (AtEngine::new(Arc::new(transport), &config), modem)
    }

    fn fast() -> AtConfig {
        AtConfig::default().with_timeout(Duration::from_millis(30))
    }

    #[test]
    fn test_sticky_keeps_first_error() {
        let (mut at, _modem) = engine(fast());
        assert_eq!(at.sticky(|_| Err::<(), _>(AtError::ErrorResult)), None);
        assert_eq!(at.sticky(|_| Ok(5)), None);
        at.set_error(AtError::Overflow);
        assert_eq!(at.last_error(), Some(&AtError::ErrorResult));

        at.clear_error();
        assert_eq!(at.sticky(|_| Ok(5)), Some(5));
    }

    #[test]
    fn test_clear_error_resets_device_error() {
        let (mut at, _modem) = engine(fast());
        at.set_device_error(DeviceError::cme(3));
        at.clear_error();
        assert!(!at.last_device_error().is_set());
    }

    #[test]
    fn test_next_byte_times_out() {
        let (mut at, _modem) = engine(fast());
        at.restart_clock();
        let started = Instant::now();
        let err = at.next_byte().unwrap_err();
        assert_eq!(err, AtError::timeout(30));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_match_literal_across_chunks() {
        let (mut at, modem) = engine(fast());
        modem.push_chunks(["+CR", "EG: 1\r\n"]);
        at.restart_clock();
        assert!(at.match_literal(b"+CREG:").unwrap());
        assert!(!at.match_literal(b"+CGREG:").unwrap());
        assert_eq!(at.buffer.unread(), b"+CREG: 1\r\n");
    }

    #[test]
    fn test_unusable_fails_immediately() {
        let (mut at, modem) = engine(fast());
        modem.push("OK\r\n");
        at.set_is_filehandle_usable(false);
        assert_eq!(at.next_byte(), Err(AtError::Unusable));
        assert_eq!(at.write_all(b"AT"), Err(AtError::Unusable));
    }

    #[test]
    fn test_short_write_is_an_error() {
        let (mut at, modem) = engine(fast());
        modem.set_write_limit(Some(2));
        at.restart_clock();
        assert_eq!(
            at.write_all(b"AT+CSQ"),
            Err(AtError::ShortWrite {
                written: 2,
                expected: 6
            })
        );
    }

    #[test]
    fn test_closed_transport_is_transport_error() {
        let (mut at, modem) = engine(fast());
        modem.close();
        at.restart_clock();
        assert!(matches!(at.next_byte(), Err(AtError::Transport(_))));
    }

    #[test]
    fn test_flush_drains_transport() {
        let (mut at, modem) = engine(fast());
        modem.push_chunks(["junk", "RING\r\n"]);
        at.restart_clock();
        assert!(at.fill_buffer(false).unwrap());
        at.flush();
        assert!(at.buffer.is_empty());
        assert_eq!(modem.pending_rx(), 0);
    }

    #[test]
    fn test_overflow_resets_buffer() {
        let (mut at, modem) = engine(fast().with_buffer_size(32));
        modem.push([b'x'; 40]);
        at.restart_clock();
        assert!(at.fill_buffer(false).unwrap());
        assert_eq!(at.fill_buffer(false), Err(AtError::Overflow));
        assert!(at.buffer.is_empty());
    }
}
