//! Background URC dispatch.
//!
//! Between commands nobody reads the port, so URCs would pile up until the
//! next response scan. [`OobPump`] runs one tokio task per handler that
//! checks for input on a fixed interval and hands
//! [`AtHandler::try_process_oob`] to the blocking pool when there is some.
//!
//! ```text
//! ┌──────────┐  tick   ┌──────────────────┐  spawn_blocking  ┌─────────────┐
//! │ Handler  │────────►│ has_pending_input│─────────────────►│ process_oob │
//! │ task     │         └──────────────────┘                  └──────┬──────┘
//! └──────────┘                                                      │
//!                           OobEvent (mpsc)  ◄─────────────────────┘
//! ```
//!
//! A handler whose channel is locked by a command session is skipped for that
//! tick; the session itself dispatches URCs it meets.
//!
//! # Examples
//!
//! ```no_run
//! use modemat_core::AtConfig;
//! use modemat_hardware::mock::MockTransport;
//! use modemat_protocol::{AtHandler, OobPump};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> modemat_core::Result<()> {
//!     let (transport, _modem) = MockTransport::new();
//!     let handler = Arc::new(AtHandler::new(Arc::new(transport), AtConfig::default())?);
//!
//!     let mut pump = OobPump::start([handler], Duration::from_millis(50));
//!     while let Some(event) = pump.recv().await {
//!         println!("{event:?}");
//!     }
//!     pump.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace};

use crate::handler::AtHandler;
use crate::registry::AtRegistry;

/// Events buffered for the application before new ones are dropped.
const EVENT_CAPACITY: usize = 64;

/// Shortest accepted tick interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OobEvent {
    /// Pending input of `transport` was processed.
    Processed {
        /// Name of the transport.
        transport: String,
    },

    /// The dispatch pass panicked. The task keeps running.
    Failed {
        /// Name of the transport.
        transport: String,

        /// Panic or cancellation message.
        error: String,
    },
}

/// Starts the background dispatch tasks.
pub struct OobPump;

impl OobPump {
    /// Spawn one dispatch task per handler on the current tokio runtime.
    ///
    /// Must be called from within a runtime.
    pub fn start<I>(handlers: I, interval: Duration) -> OobPumpHandle
    where
        I: IntoIterator<Item = Arc<AtHandler>>,
    {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let interval = interval.max(MIN_INTERVAL);
        let mut tasks = JoinSet::new();

        for handler in handlers {
            debug!(transport = handler.transport().name(), ?interval, "OOB pump task started");
            tasks.spawn(run_handler(handler, interval, event_tx.clone()));
        }

        OobPumpHandle { event_rx, tasks }
    }

    /// Pump every handler currently in `registry`.
    pub fn from_registry(registry: &AtRegistry, interval: Duration) -> OobPumpHandle {
        Self::start(registry.instances(), interval)
    }
}

async fn run_handler(handler: Arc<AtHandler>, interval: Duration, event_tx: mpsc::Sender<OobEvent>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let transport = handler.transport().name().to_string();

    loop {
        ticker.tick().await;
        if !handler.has_pending_input() {
            continue;
        }

        let worker = Arc::clone(&handler);
        let event = match tokio::task::spawn_blocking(move || worker.try_process_oob()).await {
            Ok(true) => OobEvent::Processed {
                transport: transport.clone(),
            },
            Ok(false) => {
                trace!(transport = %transport, "OOB pump skipped, channel busy");
                continue;
            }
            Err(join_error) => {
                error!(transport = %transport, error = %join_error, "OOB dispatch failed");
                OobEvent::Failed {
                    transport: transport.clone(),
                    error: join_error.to_string(),
                }
            }
        };

        // Nobody listening or a full queue must not stall dispatch.
        if let Err(err) = event_tx.try_send(event) {
            trace!(transport = %transport, error = %err, "OOB event dropped");
        }
    }
}

/// Handle to running dispatch tasks.
///
/// Dropping the handle aborts the tasks.
pub struct OobPumpHandle {
    event_rx: mpsc::Receiver<OobEvent>,
    tasks: JoinSet<()>,
}

impl OobPumpHandle {
    /// Next dispatch event, or `None` once every task has stopped.
    pub async fn recv(&mut self) -> Option<OobEvent> {
        self.event_rx.recv().await
    }

    /// Number of running dispatch tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every dispatch task and wait for them to finish.
    ///
    /// A pass already handed to the blocking pool completes on its own.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();

        let mut panicked = 0usize;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(join_error) = result
                && join_error.is_panic()
            {
                panicked += 1;
            }
        }
        debug!(panicked, "OOB pump stopped");
    }
}
