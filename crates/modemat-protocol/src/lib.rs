//! AT command engine for cellular modems.
//!
//! Turns a raw byte transport into typed, bounded command and response
//! operations. One [`AtHandler`] serves one modem port; drivers lock it for a
//! command sequence and read the response field by field:
//!
//! ```
//! use modemat_core::AtConfig;
//! use modemat_hardware::mock::MockTransport;
//! use modemat_protocol::AtHandler;
//! use std::sync::Arc;
//!
//! let (transport, modem) = MockTransport::new();
//! modem.respond("AT+COPS?", ["\r\n+COPS: 0,0,\"Elisa FI\",7\r\n\r\nOK\r\n"]);
//!
//! let handler = AtHandler::new(Arc::new(transport), AtConfig::default())?;
//! let mut at = handler.lock();
//! at.cmd_start("+COPS?").cmd_stop();
//! at.resp_start(Some("+COPS:"));
//! at.skip_param(2);
//! let operator = at.read_string(32);
//! at.resp_stop();
//! at.unlock()?;
//!
//! assert_eq!(operator.as_deref(), Some("Elisa FI"));
//! # Ok::<(), modemat_core::AtError>(())
//! ```
//!
//! Unsolicited result codes are routed to [`UrcHandler`]s, either while a
//! response is scanned or from [`AtHandler::process_oob`]; [`OobPump`] calls
//! the latter from a tokio runtime.

pub mod buffer;
pub mod builder;
pub mod engine;
pub mod handler;
pub mod matcher;
pub mod pump;
pub mod registry;
pub mod scanner;
pub mod timeout;
pub mod urc;

pub use builder::AtParam;
pub use engine::AtEngine;
pub use handler::{AtHandler, AtSession};
pub use matcher::{StopTagSet, TagKind, TagMatcher};
pub use pump::{OobEvent, OobPump, OobPumpHandle};
pub use registry::AtRegistry;
pub use scanner::{RespOptions, Scope};
pub use urc::UrcHandler;
