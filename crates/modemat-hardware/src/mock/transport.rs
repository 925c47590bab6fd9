//! Mock transport for testing and development.
//!
//! This module provides a simulated modem line that can be fed and inspected
//! programmatically, so the AT engine can be exercised without a modem.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};
use crate::traits::Transport;
use crate::types::PollEvents;

#[derive(Debug, Default)]
struct MockState {
    /// Chunks the engine has not read yet. A chunk boundary is a refill
    /// boundary: one `read` never crosses it.
    rx: VecDeque<Vec<u8>>,

    /// Everything written by the engine.
    tx: Vec<u8>,

    /// Bytes of the command line being written, up to the next `\r`.
    line: Vec<u8>,

    /// Scripted replies keyed by the full command line (without CR/LF).
    script: VecDeque<(String, Vec<Vec<u8>>)>,

    /// Maximum bytes accepted per `write`.
    write_limit: Option<usize>,

    /// Maximum bytes returned per `read`.
    max_read: Option<usize>,

    /// Error returned by the next `write`.
    write_error: Option<String>,

    closed: bool,
    writable: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    ready: Condvar,
    name: String,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Mock modem line.
///
/// Bytes pushed through the [`MockTransportHandle`] become readable by the
/// engine; bytes written by the engine are recorded and can be matched
/// against a script of canned replies.
///
/// # Examples
///
/// ```
/// use modemat_hardware::Transport;
/// use modemat_hardware::mock::MockTransport;
///
/// let (transport, handle) = MockTransport::new();
/// handle.respond("AT+CSQ", ["+CSQ: 21,99\r\n", "OK\r\n"]);
///
/// transport.write(b"AT+CSQ\r\n").unwrap();
/// assert_eq!(handle.written_string(), "AT+CSQ\r\n");
/// assert_eq!(handle.pending_rx(), 17);
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock transport with the default name.
    ///
    /// Returns a tuple of (MockTransport, MockTransportHandle) where the
    /// handle plays the modem side of the line.
    pub fn new() -> (Self, MockTransportHandle) {
        Self::with_name("mock-modem")
    }

    /// Create a new mock transport with a custom name.
    pub fn with_name(name: impl Into<String>) -> (Self, MockTransportHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState {
                writable: true,
                ..MockState::default()
            }),
            ready: Condvar::new(),
            name: name.into(),
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockTransportHandle { shared },
        )
    }

    fn disconnected(&self) -> TransportError {
        TransportError::disconnected(self.shared.name.clone())
    }
}

impl Transport for MockTransport {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(self.disconnected());
        }
        if let Some(message) = state.write_error.take() {
            return Err(TransportError::Io(std::io::Error::other(message)));
        }

        let accepted = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        let data = &buf[..accepted];
        state.tx.extend_from_slice(data);

        let mut replied = false;
        for &byte in data {
            match byte {
                b'\r' | b'\n' => {
                    if state.line.is_empty() {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&state.line).into_owned();
                    state.line.clear();
                    let matches_next = state
                        .script
                        .front()
                        .is_some_and(|(command, _)| *command == line);
                    if matches_next
                        && let Some((_, reply)) = state.script.pop_front()
                    {
                        state.rx.extend(reply);
                        replied = true;
                    }
                }
                _ => state.line.push(byte),
            }
        }
        drop(state);

        if replied {
            self.shared.ready.notify_all();
        }
        Ok(accepted)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(self.disconnected());
        }

        let limit = state.max_read.map_or(buf.len(), |max| max.min(buf.len()));
        let Some(chunk) = state.rx.front_mut() else {
            return Ok(0);
        };

        let n = limit.min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            state.rx.pop_front();
        }
        Ok(n)
    }

    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<PollEvents> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        loop {
            if state.closed {
                return Err(self.disconnected());
            }

            let mut ready = PollEvents::NONE;
            if events.is_readable() && !state.rx.is_empty() {
                ready |= PollEvents::READABLE;
            }
            if events.is_writable() && state.writable {
                ready |= PollEvents::WRITABLE;
            }
            if !ready.is_empty() {
                return Ok(ready);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(PollEvents::NONE);
            }
            state = match self.shared.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

/// Handle for controlling a mock transport.
///
/// Plays the modem: pushes response bytes, scripts replies to commands and
/// inspects what the engine wrote. It can be cloned and shared across
/// threads.
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    shared: Arc<Shared>,
}

impl MockTransportHandle {
    /// Make `data` readable as one chunk.
    pub fn push(&self, data: impl AsRef<[u8]>) {
        self.push_chunks([data]);
    }

    /// Make each element readable as its own chunk.
    pub fn push_chunks<I, B>(&self, chunks: I)
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut state = self.shared.lock();
        state.rx.extend(
            chunks
                .into_iter()
                .map(|c| c.as_ref().to_vec())
                .filter(|c| !c.is_empty()),
        );
        drop(state);
        self.shared.ready.notify_all();
    }

    /// Queue `reply` to be delivered when the engine writes the command line
    /// `command` (compared without the line terminator).
    ///
    /// Scripted replies are consumed in order; a written line that does not
    /// match the head of the script is ignored.
    pub fn respond<I, B>(&self, command: &str, reply: I)
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let chunks = reply
            .into_iter()
            .map(|c| c.as_ref().to_vec())
            .filter(|c| !c.is_empty())
            .collect();
        self.shared
            .lock()
            .script
            .push_back((command.to_string(), chunks));
    }

    /// Queue `reply` split into chunks of `chunk_size` bytes.
    pub fn respond_chunked(&self, command: &str, reply: impl AsRef<[u8]>, chunk_size: usize) {
        let size = chunk_size.max(1);
        self.respond(command, reply.as_ref().chunks(size));
    }

    /// All bytes written by the engine so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock().tx.clone()
    }

    /// Written bytes as (lossy) text.
    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.shared.lock().tx).into_owned()
    }

    /// Return and clear the written bytes.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.lock().tx)
    }

    /// Accept at most `limit` bytes per write (`None` for unlimited).
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.shared.lock().write_limit = limit;
    }

    /// Return at most `max` bytes per read (`None` for unlimited).
    pub fn set_max_read(&self, max: Option<usize>) {
        self.shared.lock().max_read = max;
    }

    /// Fail the next write with an I/O error.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.shared.lock().write_error = Some(message.into());
    }

    /// Report the line as not writable.
    pub fn set_writable(&self, writable: bool) {
        self.shared.lock().writable = writable;
        self.shared.ready.notify_all();
    }

    /// Close the line; every further call on the transport fails.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_all();
    }

    /// Bytes pushed but not yet read by the engine.
    pub fn pending_rx(&self) -> usize {
        self.shared.lock().rx.iter().map(Vec::len).sum()
    }

    /// Scripted replies still waiting for their command.
    pub fn pending_script(&self) -> usize {
        self.shared.lock().script.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(5);

    #[test]
    fn test_read_empty_returns_zero() {
        let (transport, _handle) = MockTransport::new();
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
        assert_eq!(transport.poll(PollEvents::READABLE, SHORT).unwrap(), PollEvents::NONE);
    }

    #[test]
    fn test_reads_respect_chunk_boundaries() {
        let (transport, handle) = MockTransport::new();
        handle.push_chunks(["+CS", "Q: 1\r\n"]);

        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"+CS");
        assert_eq!(transport.read(&mut buf).unwrap(), 6);
        assert_eq!(handle.pending_rx(), 0);
    }

    #[test]
    fn test_max_read_splits_chunks() {
        let (transport, handle) = MockTransport::new();
        handle.set_max_read(Some(2));
        handle.push("OK\r\n");

        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(handle.pending_rx(), 2);
    }

    #[test]
    fn test_script_replies_on_matching_line() {
        let (transport, handle) = MockTransport::new();
        handle.respond("AT", ["OK\r\n"]);
        handle.respond("AT+CSQ", ["+CSQ: 5,99\r\n", "OK\r\n"]);

        transport.write(b"AT\r\n").unwrap();
        assert_eq!(handle.pending_rx(), 4);
        assert_eq!(handle.pending_script(), 1);

        transport.write(b"AT+CS").unwrap();
        assert_eq!(handle.pending_rx(), 4);
        transport.write(b"Q\r\n").unwrap();
        assert_eq!(handle.pending_script(), 0);
        assert_eq!(handle.written_string(), "AT\r\nAT+CSQ\r\n");
    }

    #[test]
    fn test_write_limit_and_failure() {
        let (transport, handle) = MockTransport::new();
        handle.set_write_limit(Some(3));
        assert_eq!(transport.write(b"AT+CGMI\r\n").unwrap(), 3);
        assert_eq!(handle.take_written(), b"AT+");

        handle.fail_next_write("uart overrun");
        assert!(transport.write(b"x").is_err());
        assert_eq!(transport.write(b"x").unwrap(), 1);
    }

    #[test]
    fn test_poll_wakes_on_push() {
        let (transport, handle) = MockTransport::new();
        let pusher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.push("RING\r\n");
        });

        let ready = transport
            .poll(PollEvents::READABLE, Duration::from_secs(2))
            .unwrap();
        assert!(ready.is_readable());
        pusher.join().unwrap();
    }

    #[test]
    fn test_close_fails_every_call() {
        let (transport, handle) = MockTransport::with_name("ttyS1");
        handle.close();

        let err = transport.poll(PollEvents::READABLE, SHORT).unwrap_err();
        assert!(err.is_disconnected());
        assert!(transport.write(b"AT").is_err());
        assert!(transport.read(&mut [0u8; 1]).is_err());
        assert_eq!(transport.name(), "ttyS1");
    }
}
