//! Locked access to an AT channel.
//!
//! [`AtHandler`] owns the engine behind a mutex. A command and its response
//! run inside one [`AtSession`], so a URC dispatcher or another driver never
//! sees half a response.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use modemat_core::constants::{SYNC_ATTEMPTS, SYNC_COMMAND, SYNC_RESPONSE};
use modemat_core::{AtConfig, AtError, Result};
use modemat_hardware::{PollEvents, Transport};
use tracing::debug;

use crate::builder::AtParam;
use crate::engine::AtEngine;
use crate::scanner::Scope;
use crate::urc::UrcHandler;

/// One AT channel over a shared transport.
pub struct AtHandler {
    engine: Mutex<AtEngine>,
    transport: Arc<dyn Transport>,
    ref_count: AtomicUsize,
}

impl AtHandler {
    /// Create a handler with a reference count of one.
    ///
    /// # Errors
    /// Returns [`AtError::Config`] if `config` does not validate.
    pub fn new(transport: Arc<dyn Transport>, config: AtConfig) -> Result<Self> {
        config.validate()?;
        let engine = AtEngine::new(Arc::clone(&transport), &config);
        Ok(Self {
            engine: Mutex::new(engine),
            transport,
            ref_count: AtomicUsize::new(1),
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Lock the channel for a command sequence.
    ///
    /// Clears the error state and starts the deadline clock. A lock left
    /// poisoned by a panicking caller is recovered and the engine reset.
    pub fn lock(&self) -> AtSession<'_> {
        let mut guard = self.acquire();
        guard.begin_session();
        AtSession { guard }
    }

    /// Like [`lock`](Self::lock), but returns `None` while another session
    /// holds the channel.
    pub fn try_lock(&self) -> Option<AtSession<'_>> {
        let mut guard = match self.engine.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => self.recover(poisoned.into_inner()),
        };
        guard.begin_session();
        Some(AtSession { guard })
    }

    fn acquire(&self) -> MutexGuard<'_, AtEngine> {
        match self.engine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => self.recover(poisoned.into_inner()),
        }
    }

    fn recover<'a>(&'a self, mut guard: MutexGuard<'a, AtEngine>) -> MutexGuard<'a, AtEngine> {
        self.engine.clear_poison();
        guard.recover();
        guard
    }

    // ------------------------------------------------------------------------
    // Reference count
    // ------------------------------------------------------------------------

    pub fn inc_ref_count(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement, saturating at zero. Returns the new count.
    pub fn dec_ref_count(&self) -> usize {
        let previous = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or_else(|count| count);
        previous.saturating_sub(1)
    }

    /// Decrement unless the count is already zero. Returns the new count.
    pub(crate) fn release_ref(&self) -> Option<usize> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Out-of-band data
    // ------------------------------------------------------------------------

    /// Dispatch pending URCs, waiting for a running session to finish.
    pub fn process_oob(&self) {
        self.acquire().process_oob();
    }

    /// Dispatch pending URCs unless a session holds the channel.
    ///
    /// Returns false when the channel was busy.
    pub fn try_process_oob(&self) -> bool {
        let mut guard = match self.engine.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return false,
            Err(TryLockError::Poisoned(poisoned)) => self.recover(poisoned.into_inner()),
        };
        guard.process_oob();
        true
    }

    /// Returns true if the transport is readable or buffered bytes remain.
    pub fn has_pending_input(&self) -> bool {
        let readable = self
            .transport
            .poll(PollEvents::READABLE, Duration::ZERO)
            .is_ok_and(|ready| ready.is_readable());
        if readable {
            return true;
        }
        match self.engine.try_lock() {
            Ok(engine) => !engine.buffer.is_empty(),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------------
    // Settings outside a session
    // ------------------------------------------------------------------------

    pub fn set_urc_handler(
        &self,
        prefix: &str,
        handler: Option<&Arc<dyn UrcHandler>>,
    ) -> Result<()> {
        self.acquire().set_urc_handler(prefix, handler)
    }

    pub fn remove_urc_handler(&self, prefix: &str) -> bool {
        self.acquire().remove_urc_handler(prefix)
    }

    pub fn urc_handler_count(&self) -> usize {
        self.acquire().urc_handler_count()
    }

    pub fn set_debug(&self, enabled: bool) {
        self.acquire().set_debug(enabled);
    }

    pub fn set_at_timeout(&self, timeout: Duration, sticky: bool) {
        self.acquire().set_at_timeout(timeout, sticky);
    }

    /// Drop URC handlers and release the receive buffer.
    pub(crate) fn detach(&self) {
        self.acquire().detach();
    }

    // ------------------------------------------------------------------------
    // One-shot commands
    // ------------------------------------------------------------------------

    /// Query the modem until it answers; see [`AtEngine::sync`].
    pub fn sync(&self, timeout: Duration) -> bool {
        self.lock().sync(timeout)
    }

    /// Send a command and accept any successful response.
    pub fn at_cmd_discard(&self, cmd: &str, params: &[AtParam<'_>]) -> Result<()> {
        let mut at = self.lock();
        at.cmd_start_stop(cmd, params);
        at.resp_start(None);
        at.resp_stop();
        at.unlock()
    }

    /// Send a command and read the first integer of its `resp_prefix` row.
    pub fn at_cmd_int(&self, cmd: &str, params: &[AtParam<'_>], resp_prefix: &str) -> Result<i32> {
        let mut at = self.lock();
        at.cmd_start_stop(cmd, params);
        at.resp_start(Some(resp_prefix));
        let value = at.read_int();
        at.resp_stop();
        at.unlock()?;
        value.ok_or_else(|| AtError::malformed(format!("no {resp_prefix} row")))
    }

    /// Send a command and read the first field of its `resp_prefix` row.
    pub fn at_cmd_str(
        &self,
        cmd: &str,
        params: &[AtParam<'_>],
        resp_prefix: &str,
        max_len: usize,
    ) -> Result<String> {
        let mut at = self.lock();
        at.cmd_start_stop(cmd, params);
        at.resp_start(Some(resp_prefix));
        let value = at.read_string(max_len);
        at.resp_stop();
        at.unlock()?;
        value.ok_or_else(|| AtError::malformed(format!("no {resp_prefix} row")))
    }
}

impl std::fmt::Debug for AtHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtHandler")
            .field("transport", &self.transport.name())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

impl AtEngine {
    /// Send `AT+CMEE?` until the modem answers with a `+CMEE:` row and a
    /// successful result, at most [`SYNC_ATTEMPTS`] times.
    ///
    /// Each attempt gets `timeout`; the previous timeout is restored
    /// afterwards. A bare `OK` left over from an earlier command does not
    /// count as an answer.
    pub fn sync(&mut self, timeout: Duration) -> bool {
        let saved_timeout = self.timeout;
        self.set_at_timeout(timeout, false);
        let mut synced = false;

        for attempt in 1..=SYNC_ATTEMPTS {
            self.clear_error();
            self.restart_clock();
            self.cmd_start_stop(SYNC_COMMAND, &[]);
            self.resp_start(Some(SYNC_RESPONSE));
            let answered = self.scope() >= Scope::Info;
            self.resp_stop();

            if answered && self.last_error().is_none() {
                debug!(transport = self.transport_name(), attempt, "AT sync");
                synced = true;
                break;
            }
        }

        self.timeout = saved_timeout;
        synced
    }
}

/// A locked AT channel.
///
/// Dereferences to [`AtEngine`]. Dropping the session releases the lock;
/// [`unlock`](Self::unlock) also reports the first error of the sequence.
pub struct AtSession<'a> {
    guard: MutexGuard<'a, AtEngine>,
}

impl AtSession<'_> {
    /// Release the channel.
    ///
    /// # Errors
    /// The first error recorded during the session.
    pub fn unlock(self) -> Result<()> {
        match self.guard.last_error() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Deref for AtSession<'_> {
    type Target = AtEngine;

    fn deref(&self) -> &AtEngine {
        &self.guard
    }
}

impl DerefMut for AtSession<'_> {
    fn deref_mut(&mut self) -> &mut AtEngine {
        &mut self.guard
    }
}
