//! Serial port transport built on the `serialport` crate.
//!
//! The port is split with `try_clone` into a reader and a writer half so a
//! pending write never waits behind a read of the same handle. Readiness is
//! emulated with `bytes_to_read`, polled in short sleeps.

use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;
use crate::types::PollEvents;

/// Interval between two `bytes_to_read` checks while polling.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    pub hardware_flow_control: bool,
}

impl SerialConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            hardware_flow_control: false,
        }
    }

    pub fn with_hardware_flow_control(mut self, enabled: bool) -> Self {
        self.hardware_flow_control = enabled;
        self
    }
}

/// Modem attached to a serial port.
pub struct SerialTransport {
    reader: Mutex<Box<dyn SerialPort>>,
    writer: Mutex<Box<dyn SerialPort>>,
    name: String,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open the port described by `config` (8N1).
    pub fn open(config: &SerialConfig) -> Result<Self> {
        if config.baud_rate == 0 {
            return Err(TransportError::configuration("baud rate must not be zero"));
        }

        let flow_control = if config.hardware_flow_control {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        };

        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(flow_control)
            .timeout(POLL_INTERVAL)
            .open()?;

        debug!(path = %config.path, baud = config.baud_rate, "Serial port opened");
        Self::from_port(port, config.path.clone())
    }

    /// Wrap an already opened port.
    pub fn from_port(port: Box<dyn SerialPort>, name: impl Into<String>) -> Result<Self> {
        let writer = port.try_clone()?;
        Ok(Self {
            reader: Mutex::new(port),
            writer: Mutex::new(writer),
            name: name.into(),
        })
    }

    fn lock(port: &Mutex<Box<dyn SerialPort>>) -> MutexGuard<'_, Box<dyn SerialPort>> {
        port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(&self) -> Result<usize> {
        let pending = Self::lock(&self.reader).bytes_to_read()?;
        Ok(usize::try_from(pending).unwrap_or(usize::MAX))
    }
}

impl Transport for SerialTransport {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut writer = Self::lock(&self.writer);
        match writer.write(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let available = self.available()?;
        if available == 0 || buf.is_empty() {
            return Ok(0);
        }

        let n = available.min(buf.len());
        let mut reader = Self::lock(&self.reader);
        match reader.read(&mut buf[..n]) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn poll(&self, events: PollEvents, timeout: Duration) -> Result<PollEvents> {
        if events.is_writable() {
            return Ok(PollEvents::WRITABLE);
        }
        if !events.is_readable() {
            return Ok(PollEvents::NONE);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.available()? > 0 {
                return Ok(PollEvents::READABLE);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(PollEvents::NONE);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_baud_rate_rejected() {
        let err = SerialTransport::open(&SerialConfig::new("/dev/null", 0)).unwrap_err();
        assert!(matches!(err, TransportError::ConfigurationError { .. }));
    }

    #[test]
    fn test_missing_port_fails_to_open() {
        assert!(SerialTransport::open(&SerialConfig::new("/dev/modemat-missing", 115_200)).is_err());
    }
}
