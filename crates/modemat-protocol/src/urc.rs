//! Unsolicited result codes.
//!
//! Modems report events (`+CREG: 1`, `RING`, `+CMTI: "SM",3`...) on the same
//! line as command responses. A driver registers a handler per line prefix;
//! the engine dispatches a matching line whenever it meets one at a line
//! start, either while waiting for a response or from
//! [`AtEngine::process_oob`].
//!
//! The registry keeps only a [`Weak`] reference to each handler. The driver
//! owns the `Arc`; once it is dropped the entry is pruned on the next match
//! and the line is discarded.
//!
//! ```
//! use modemat_core::AtConfig;
//! use modemat_hardware::mock::MockTransport;
//! use modemat_protocol::{AtEngine, AtHandler, UrcHandler};
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! let (transport, modem) = MockTransport::new();
//! let handler = AtHandler::new(Arc::new(transport), AtConfig::default())?;
//!
//! let stat = Arc::new(AtomicI32::new(-1));
//! let seen = Arc::clone(&stat);
//! let on_creg: Arc<dyn UrcHandler> = Arc::new(move |at: &mut AtEngine| {
//!     if let Some(value) = at.read_int() {
//!         seen.store(value, Ordering::SeqCst);
//!     }
//! });
//! handler.set_urc_handler("+CREG:", Some(&on_creg))?;
//!
//! modem.push("\r\n+CREG: 5\r\n");
//! handler.process_oob();
//! assert_eq!(stat.load(Ordering::SeqCst), 5);
//! # Ok::<(), modemat_core::AtError>(())
//! ```

use std::sync::{Arc, Weak};

use modemat_core::constants::MAX_URC_PREFIX_LEN;
use modemat_core::{AtError, Result};
use modemat_hardware::PollEvents;
use tracing::{debug, trace};

use crate::engine::AtEngine;
use crate::scanner::{RowState, Scope};

/// Callback for one URC prefix.
///
/// Invoked with the engine positioned right after the prefix, inside the
/// row. The handler may read fields; the rest of the line is consumed after
/// it returns and any error it caused is discarded.
pub trait UrcHandler: Send + Sync {
    fn on_urc(&self, at: &mut AtEngine);
}

impl<F> UrcHandler for F
where
    F: Fn(&mut AtEngine) + Send + Sync,
{
    fn on_urc(&self, at: &mut AtEngine) {
        self(at)
    }
}

struct UrcEntry {
    prefix: Vec<u8>,
    handler: Weak<dyn UrcHandler>,
}

/// Prefix to handler mapping.
#[derive(Default)]
pub struct UrcRegistry {
    entries: Vec<UrcEntry>,
}

impl UrcRegistry {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Insert or replace the handler for `prefix`.
    pub fn insert(&mut self, prefix: &[u8], handler: &Arc<dyn UrcHandler>) {
        let handler = Arc::downgrade(handler);
        match self.entries.iter_mut().find(|e| e.prefix == prefix) {
            Some(entry) => entry.handler = handler,
            None => self.entries.push(UrcEntry {
                prefix: prefix.to_vec(),
                handler,
            }),
        }
    }

    /// Returns true if an entry was removed.
    pub fn remove(&mut self, prefix: &[u8]) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.prefix != prefix);
        self.entries.len() != before
    }

    fn prefixes(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|e| e.prefix.clone()).collect()
    }

    /// Live handler for `prefix`; a dead entry is removed.
    fn upgrade(&mut self, prefix: &[u8]) -> Option<Arc<dyn UrcHandler>> {
        let index = self.entries.iter().position(|e| e.prefix == prefix)?;
        match self.entries[index].handler.upgrade() {
            Some(handler) => Some(handler),
            None => {
                self.entries.remove(index);
                None
            }
        }
    }
}

impl std::fmt::Debug for UrcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.prefix.escape_ascii().to_string()))
            .finish()
    }
}

impl AtEngine {
    /// Register, replace (`Some`) or remove (`None`) the handler for
    /// `prefix`.
    ///
    /// The registry does not keep the handler alive.
    pub fn set_urc_handler(
        &mut self,
        prefix: &str,
        handler: Option<&Arc<dyn UrcHandler>>,
    ) -> Result<()> {
        if prefix.is_empty() {
            return Err(AtError::invalid_parameter("URC prefix must not be empty"));
        }
        if prefix.len() > MAX_URC_PREFIX_LEN {
            return Err(AtError::invalid_parameter(format!(
                "URC prefix {prefix:?} is longer than {MAX_URC_PREFIX_LEN} bytes"
            )));
        }

        match handler {
            Some(handler) => {
                self.urcs.insert(prefix.as_bytes(), handler);
                debug!(transport = self.transport_name(), prefix, "URC handler set");
            }
            None => {
                self.remove_urc_handler(prefix);
            }
        }
        Ok(())
    }

    /// Returns true if a handler was registered for `prefix`.
    pub fn remove_urc_handler(&mut self, prefix: &str) -> bool {
        let removed = self.urcs.remove(prefix.as_bytes());
        if removed {
            debug!(transport = self.transport_name(), prefix, "URC handler removed");
        }
        removed
    }

    pub fn urc_handler_count(&self) -> usize {
        self.urcs.len()
    }

    /// Dispatch every complete URC line available, discarding other lines.
    ///
    /// Refills use the URC timeout; the AT timeout and error state are the
    /// same afterwards as before.
    pub fn process_oob(&mut self) {
        if !self.is_filehandle_usable() {
            return;
        }
        if self.buffer.is_empty() {
            match self.transport.poll(PollEvents::READABLE, std::time::Duration::ZERO) {
                Ok(ready) if ready.is_readable() => {}
                _ => return,
            }
        }

        trace!(transport = self.transport_name(), "AT process OOB");
        let saved_timeout = self.timeout;
        let saved_error = self.take_error();
        let saved_device_error = self.last_device_error();
        self.timeout.set(self.urc_timeout, false);
        self.restart_clock();

        if let Err(error) = self.scan_oob() {
            trace!(transport = self.transport_name(), %error, "AT OOB scan stopped");
        }

        self.timeout = saved_timeout;
        self.clear_error();
        if let Some(error) = saved_error {
            self.set_error(error);
        }
        self.set_device_error(saved_device_error);
    }

    fn scan_oob(&mut self) -> Result<()> {
        loop {
            if self.buffer.is_empty() && !self.fill_buffer(true)? {
                return Ok(());
            }

            let Some(byte) = self.buffer.peek() else {
                continue;
            };
            if byte == b'\r' || byte == b'\n' {
                self.buffer.consume(1);
                continue;
            }
            if self.match_urc()? {
                continue;
            }

            if self.buffer.unread().contains(&b'\n') {
                self.skip_line()?;
            } else if self.buffer.is_full() {
                debug!(
                    transport = self.transport_name(),
                    "AT OOB dropping unterminated line"
                );
                self.buffer.clear();
            } else if !self.fill_buffer(true)? {
                // Keep the partial line for the next pass.
                return Ok(());
            }
        }
    }

    /// At a line start: dispatch the URC whose prefix begins the line.
    pub(crate) fn match_urc(&mut self) -> Result<bool> {
        if self.urcs.is_empty() {
            return Ok(false);
        }
        for prefix in self.urcs.prefixes() {
            if self.match_literal(&prefix)? {
                self.buffer.consume(prefix.len());
                self.dispatch_urc(&prefix)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run the handler for a consumed `prefix`, then consume the rest of the
    /// line. Scanner state of an enclosing response is kept.
    fn dispatch_urc(&mut self, prefix: &[u8]) -> Result<()> {
        let saved_row = self.row;
        let saved_tags = std::mem::take(&mut self.tags);
        let saved_error = self.take_error();

        let handler = self.urcs.upgrade(prefix);
        self.row = RowState {
            scope: Scope::Info,
            pending_space: true,
            ..RowState::default()
        };

        match handler {
            Some(handler) => {
                debug!(
                    transport = self.transport_name(),
                    prefix = %prefix.escape_ascii(),
                    "URC dispatch"
                );
                handler.on_urc(self);
            }
            None => trace!(
                transport = self.transport_name(),
                prefix = %prefix.escape_ascii(),
                "URC handler dropped, discarding line"
            ),
        }

        // The handler's own errors stay with the URC.
        self.clear_error();
        let finished = self.finish_urc_row();

        self.row = saved_row;
        self.tags = saved_tags;
        if let Some(error) = saved_error {
            self.set_error(error);
        }
        finished
    }

    /// Consume the rest of a URC line unless the handler already did.
    fn finish_urc_row(&mut self) -> Result<()> {
        if !self.row.info_found && !self.buffer.at_line_start() {
            self.skip_line()?;
        }
        Ok(())
    }
}
