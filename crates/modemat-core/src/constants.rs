//! Wire-level constants for the AT command protocol.
//!
//! This module defines the byte sequences and default limits shared by the
//! transport adapters and the protocol engine. Keeping them in one place makes
//! the wire format easy to audit against a modem's AT command manual.
//!
//! # Wire Format
//!
//! Outgoing commands and incoming responses look like this:
//!
//! ```text
//! AT+COPS=0,2,"24491"\r\n           <- command, parameters, terminator
//! \r\n+COPS: 0,2,"24491",7\r\n      <- information row
//! \r\nOK\r\n                        <- final result code
//! ```
//!
//! | Sequence | Name | Meaning |
//! |----------|------|---------|
//! | `OK\r\n` | [`OK`] | Command completed |
//! | `ERROR\r\n` | [`ERROR`] | Command failed, no detail |
//! | `+CME ERROR:` | [`CME_ERROR`] | Mobile equipment error, numeric code follows |
//! | `+CMS ERROR:` | [`CMS_ERROR`] | Message service error, numeric code follows |
//! | `\r\n` | [`CRLF`] | Ends an information row |
//! | `)` | [`ELEM_STOP`] | Ends a parenthesised element inside a row |

// ============================================================================
// Command Framing
// ============================================================================

/// Prefix written before every command.
///
/// # Examples
///
/// ```
/// use modemat_core::constants::AT_PREFIX;
///
/// let command = format!("{AT_PREFIX}+CSQ");
/// assert_eq!(command, "AT+CSQ");
/// ```
pub const AT_PREFIX: &str = "AT";

/// Default terminator written by `cmd_stop`.
pub const DEFAULT_OUTPUT_DELIMITER: &str = "\r\n";

/// Default parameter delimiter for both directions.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Quote character surrounding string parameters.
pub const QUOTE: u8 = b'"';

// ============================================================================
// Response Tags
// ============================================================================

/// Line terminator used by modems for every response line.
pub const CRLF: &[u8] = b"\r\n";

/// Successful final result code.
pub const OK: &[u8] = b"OK\r\n";

/// Generic failure final result code.
pub const ERROR: &[u8] = b"ERROR\r\n";

/// Mobile equipment error prefix; a numeric (or verbose) code follows.
pub const CME_ERROR: &[u8] = b"+CME ERROR:";

/// Message service error prefix; a numeric (or verbose) code follows.
pub const CMS_ERROR: &[u8] = b"+CMS ERROR:";

/// Closing tag of a parenthesised element such as `(0-1)`.
pub const ELEM_STOP: &[u8] = b")";

/// Command `sync` sends to check that the modem answers.
///
/// `+CMEE?` is supported by practically every modem and its `+CMEE:` row
/// cannot be confused with a stray `OK` left over from an earlier command.
pub const SYNC_COMMAND: &str = "+CMEE?";

/// Information row prefix expected in reply to [`SYNC_COMMAND`].
pub const SYNC_RESPONSE: &str = "+CMEE:";

// ============================================================================
// Timing
// ============================================================================

/// Default time budget of one locked command/response sequence (milliseconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Refill budget while scanning unsolicited data (milliseconds).
///
/// Out-of-band processing must give the line back quickly when nothing
/// recognisable arrives.
pub const DEFAULT_URC_TIMEOUT_MS: u64 = 20;

/// Longest single transport poll (milliseconds).
pub const DEFAULT_POLL_SLICE_MS: u64 = 10;

/// Number of attempts `sync` makes before giving up.
pub const SYNC_ATTEMPTS: usize = 10;

// ============================================================================
// Limits
// ============================================================================

/// Default receive buffer capacity in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Smallest receive buffer accepted by configuration.
///
/// Must hold the longest URC prefix plus the longest result tag so prefix
/// matching never needs more than one buffer of lookahead.
pub const MIN_BUFFER_SIZE: usize = 32;

/// Longest URC prefix accepted by the registry.
pub const MAX_URC_PREFIX_LEN: usize = 24;

/// Longest decimal field accepted by `read_int`.
pub const MAX_INT_FIELD_LEN: usize = 16;

/// Longest text accepted after `+CME ERROR:` / `+CMS ERROR:`.
pub const MAX_ERROR_FIELD_LEN: usize = 64;
