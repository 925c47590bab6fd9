use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_DELIMITER, DEFAULT_OUTPUT_DELIMITER, DEFAULT_POLL_SLICE_MS,
    DEFAULT_TIMEOUT_MS, DEFAULT_URC_TIMEOUT_MS, MIN_BUFFER_SIZE,
};
use crate::error::{AtError, Result};

/// Which check wins when a line could be both a URC and the expected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrcPriority {
    /// Registered URC prefixes are checked before the expected response prefix.
    #[default]
    UrcFirst,

    /// The expected response prefix is checked before URC prefixes.
    ResponseFirst,
}

/// Construction parameters of an AT handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtConfig {
    /// Time budget of one locked sequence.
    pub timeout_ms: u64,

    /// Refill budget used while processing out-of-band data.
    pub urc_timeout_ms: u64,

    /// Longest single poll on the transport.
    pub poll_slice_ms: u64,

    /// Minimum gap between the end of a response and the next command.
    pub send_delay_ms: u64,

    /// Receive buffer capacity in bytes.
    pub buffer_size: usize,

    /// Parameter delimiter, both directions.
    pub delimiter: char,

    /// Terminator written by `cmd_stop`.
    pub output_delimiter: String,

    /// Trace every byte written and read.
    pub debug: bool,

    pub urc_priority: UrcPriority,
}

impl Default for AtConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            urc_timeout_ms: DEFAULT_URC_TIMEOUT_MS,
            poll_slice_ms: DEFAULT_POLL_SLICE_MS,
            send_delay_ms: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            delimiter: DEFAULT_DELIMITER as char,
            output_delimiter: DEFAULT_OUTPUT_DELIMITER.to_string(),
            debug: false,
            urc_priority: UrcPriority::UrcFirst,
        }
    }
}

impl AtConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_urc_timeout(mut self, timeout: Duration) -> Self {
        self.urc_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_output_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.output_delimiter = delimiter.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_urc_priority(mut self, priority: UrcPriority) -> Self {
        self.urc_priority = priority;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn urc_timeout(&self) -> Duration {
        Duration::from_millis(self.urc_timeout_ms)
    }

    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms.max(1))
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    /// Delimiter as the byte written to and scanned on the wire.
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }

    /// Check the values a handler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(AtError::config(format!(
                "buffer_size {} is below the minimum of {MIN_BUFFER_SIZE}",
                self.buffer_size
            )));
        }
        let delimiter = self.delimiter;
        if !(delimiter.is_ascii_graphic() || delimiter == ' ') || delimiter == '"' {
            return Err(AtError::config(format!(
                "delimiter {:?} must be a printable ASCII character other than a quote",
                self.delimiter
            )));
        }
        if !self.output_delimiter.is_ascii() {
            return Err(AtError::config("output_delimiter must be ASCII"));
        }
        if self.poll_slice_ms == 0 {
            return Err(AtError::config("poll_slice_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
