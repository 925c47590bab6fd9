use modemat_core::constants::{AT_PREFIX, QUOTE};

use crate::engine::AtEngine;

/// Typed command parameter for [`AtEngine::cmd_start_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtParam<'a> {
    /// Decimal integer.
    Int(i64),
    /// Text written as is.
    Str(&'a str),
    /// Text wrapped in double quotes.
    Quoted(&'a str),
    /// Bytes written as uppercase hex digits.
    Hex(&'a [u8]),
}

impl From<i64> for AtParam<'_> {
    fn from(value: i64) -> Self {
        AtParam::Int(value)
    }
}

impl From<i32> for AtParam<'_> {
    fn from(value: i32) -> Self {
        AtParam::Int(i64::from(value))
    }
}

impl<'a> From<&'a str> for AtParam<'a> {
    fn from(value: &'a str) -> Self {
        AtParam::Quoted(value)
    }
}

/// Command builder.
///
/// Each call writes straight to the transport. Parameters after the first
/// are preceded by the active delimiter. Every method returns the engine so
/// a command reads as one chain; after a failure the rest of the chain is a
/// no-op.
///
/// ```text
/// cmd_start("+CMGS")  write_string("+3581", true)  write_int(145)  cmd_stop()
///       AT+CMGS             ="+3581"   <- no delimiter   ,145          \r\n
/// ```
impl AtEngine {
    /// Write `"AT" + cmd`.
    ///
    /// Waits out the send delay counted from the previous `resp_stop`.
    pub fn cmd_start(&mut self, cmd: &str) -> &mut Self {
        self.sticky(|at| {
            at.wait_send_delay();
            at.cmd_first_param = true;
            let mut line = Vec::with_capacity(AT_PREFIX.len() + cmd.len());
            line.extend_from_slice(AT_PREFIX.as_bytes());
            line.extend_from_slice(cmd.as_bytes());
            at.write_all(&line)
        });
        self
    }

    pub fn write_int(&mut self, value: i64) -> &mut Self {
        self.sticky(|at| {
            at.begin_param()?;
            at.write_all(value.to_string().as_bytes())
        });
        self
    }

    /// Write a text parameter, optionally in double quotes.
    pub fn write_string(&mut self, value: &str, quoted: bool) -> &mut Self {
        self.sticky(|at| {
            at.begin_param()?;
            if quoted {
                let mut field = Vec::with_capacity(value.len() + 2);
                field.push(QUOTE);
                field.extend_from_slice(value.as_bytes());
                field.push(QUOTE);
                at.write_all(&field)
            } else {
                at.write_all(value.as_bytes())
            }
        });
        self
    }

    /// Write raw bytes with no delimiter (SMS PDUs, socket payloads).
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.sticky(|at| at.write_all(data));
        self
    }

    /// Write `data` as an uppercase hex parameter.
    pub fn write_hex_string(&mut self, data: &[u8]) -> &mut Self {
        self.sticky(|at| {
            at.begin_param()?;
            at.write_all(encode_hex(data).as_bytes())
        });
        self
    }

    /// Terminate the command with the output delimiter.
    pub fn cmd_stop(&mut self) -> &mut Self {
        self.sticky(|at| {
            let terminator = std::mem::take(&mut at.output_delimiter);
            let written = at.write_all(&terminator);
            at.output_delimiter = terminator;
            written
        });
        self
    }

    /// `cmd_stop` followed by a response with no expected row.
    pub fn cmd_stop_read_resp(&mut self) -> &mut Self {
        self.cmd_stop();
        self.resp_start(None);
        self.resp_stop();
        self
    }

    /// Write a whole command: `cmd_start`, each parameter, `cmd_stop`.
    pub fn cmd_start_stop(&mut self, cmd: &str, params: &[AtParam<'_>]) -> &mut Self {
        self.cmd_start(cmd);
        for param in params {
            match *param {
                AtParam::Int(value) => self.write_int(value),
                AtParam::Str(value) => self.write_string(value, false),
                AtParam::Quoted(value) => self.write_string(value, true),
                AtParam::Hex(data) => self.write_hex_string(data),
            };
        }
        self.cmd_stop()
    }

    fn begin_param(&mut self) -> modemat_core::Result<()> {
        if self.cmd_first_param {
            self.cmd_first_param = false;
            return Ok(());
        }
        let delimiter = [self.delimiter];
        self.write_all(&delimiter)
    }
}

fn encode_hex(data: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(data.len() * 2);
    for &byte in data {
        out.push(char::from(DIGITS[usize::from(byte >> 4)]));
        out.push(char::from(DIGITS[usize::from(byte & 0x0f)]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use modemat_core::{AtConfig, AtError};
    use modemat_hardware::mock::{MockTransport, MockTransportHandle};
    use rstest::rstest;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn engine(config: AtConfig) -> (AtEngine, MockTransportHandle) {
        let (transport, modem) = MockTransport::new();
        let mut at = AtEngine::new(Arc::new(transport), &config);
        at.begin_session();
        (at, modem)
    }

    fn fast() -> AtConfig {
        AtConfig::default().with_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_command_with_params() {
        let (mut at, modem) = engine(fast());
        at.cmd_start("+CMGS=")
            .write_string("+358401234567", true)
            .write_int(145)
            .cmd_stop();
        assert_eq!(modem.written_string(), "AT+CMGS=\"+358401234567\",145\r\n");
        assert_eq!(at.last_error(), None);
    }

    #[test]
    fn test_first_param_has_no_delimiter() {
        let (mut at, modem) = engine(fast());
        at.cmd_start("+CFUN=").write_int(1).write_int(0).cmd_stop();
        at.cmd_start("+CFUN=").write_int(4).cmd_stop();
        assert_eq!(modem.written_string(), "AT+CFUN=1,0\r\nAT+CFUN=4\r\n");
    }

    #[test]
    fn test_write_bytes_is_raw() {
        let (mut at, modem) = engine(fast());
        at.cmd_start("+X=").write_int(1).write_bytes(b"ab").write_int(2);
        assert_eq!(modem.written_string(), "AT+X=1ab,2");
    }

    #[rstest]
    #[case(&[0x00, 0xab, 0x7f], "00AB7F")]
    #[case(&[], "")]
    fn test_encode_hex(#[case] data: &[u8], #[case] expected: &str) {
        assert_eq!(encode_hex(data), expected);
    }

    #[test]
    fn test_cmd_start_stop_params() {
        let (mut at, modem) = engine(fast());
        at.cmd_start_stop(
            "+QISEND=",
            &[
                AtParam::Int(0),
                AtParam::Str("AB"),
                AtParam::Quoted("x"),
                AtParam::Hex(&[0x1f]),
            ],
        );
        assert_eq!(modem.written_string(), "AT+QISEND=0,AB,\"x\",1F\r\n");
    }

    #[test]
    fn test_custom_delimiters() {
        let (mut at, modem) = engine(fast().with_output_delimiter("\r"));
        at.set_delimiter(b';');
        at.cmd_start_stop("+X=", &[1i64.into(), 2i64.into()]);
        at.set_default_delimiter();
        at.cmd_start_stop("+Y=", &[1i64.into(), "a".into()]);
        assert_eq!(modem.written_string(), "AT+X=1;2\rAT+Y=1,\"a\"\r");
    }

    #[test]
    fn test_failure_turns_command_into_no_op() {
        let (mut at, modem) = engine(fast());
        modem.fail_next_write("port gone");
        at.cmd_start("+CSQ").write_int(1).cmd_stop();
        assert!(matches!(at.last_error(), Some(AtError::Transport(_))));
        assert_eq!(modem.written_string(), "");
    }

    #[test]
    fn test_cmd_stop_read_resp() {
        let (mut at, modem) = engine(fast());
        modem.respond("AT+CMGF=0", ["\r\nOK\r\n"]);
        at.cmd_start("+CMGF=").write_int(0).cmd_stop_read_resp();
        assert_eq!(at.last_error(), None);
        assert_eq!(modem.pending_script(), 0);
    }

    #[test]
    fn test_send_delay_after_response() {
        let (mut at, modem) = engine(fast().with_send_delay(Duration::from_millis(30)));
        modem.respond("AT", ["OK\r\n"]);
        at.cmd_start("").cmd_stop_read_resp();

        let started = Instant::now();
        at.cmd_start("").cmd_stop();
        assert!(started.elapsed() >= Duration::from_millis(25));
    }
}
