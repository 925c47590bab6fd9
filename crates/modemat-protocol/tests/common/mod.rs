//! Common test utilities for integration tests.
//!
//! Every test talks to a scripted [`MockTransport`]: the test queues the
//! modem's reply for a command line, the engine writes the command and the
//! reply appears on the receive side as soon as the line is complete.
//!
//! ```ignore
//! let (handler, modem) = common::handler();
//! modem.respond("AT+CSQ", ["\r\n+CSQ: 21,99\r\n\r\nOK\r\n"]);
//! assert_eq!(handler.at_cmd_int("+CSQ", &[], "+CSQ:"), Ok(21));
//! ```

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use modemat_core::AtConfig;
use modemat_hardware::mock::{MockTransport, MockTransportHandle};
use modemat_protocol::{AtEngine, AtHandler, UrcHandler};

/// AT timeout used by most tests.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(100);

static TRACING: Once = Once::new();

/// Install a test subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn config() -> AtConfig {
    AtConfig::default()
        .with_timeout(TEST_TIMEOUT)
        .with_urc_timeout(Duration::from_millis(10))
        .with_debug(true)
}

/// Handler over a fresh mock transport.
pub fn handler() -> (AtHandler, MockTransportHandle) {
    handler_with(config())
}

pub fn handler_with(config: AtConfig) -> (AtHandler, MockTransportHandle) {
    init_tracing();
    let (transport, modem) = MockTransport::with_name("mock-modem");
    let handler = AtHandler::new(Arc::new(transport), config).expect("valid test config");
    (handler, modem)
}

/// URC handler that records the first field of each line.
pub struct Recorder {
    pub lines: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("recorder lock").clone()
    }
}

impl UrcHandler for Recorder {
    fn on_urc(&self, at: &mut AtEngine) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(field) = at.read_string(64) {
            self.lines.lock().expect("recorder lock").push(field);
        }
    }
}
