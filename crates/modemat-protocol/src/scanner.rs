//! Response scanner.
//!
//! Turns the reply to a command into fields. A response is read in nested
//! scopes, each with its own stop tags:
//!
//! ```text
//! NotSet ──resp_start──► Resp ──row found──► Info ──info_elem──► Elem
//!   ▲                     │  ▲                 │  ▲               │
//!   │                     │  └──row closed─────┘  └─elem closed───┘
//!   └─────resp_stop───────┘
//! ```
//!
//! | Scope | Stop tags |
//! |-------|-----------|
//! | `Resp` | `OK\r\n` (or the custom tag), `+CME ERROR:`, `+CMS ERROR:`, `ERROR\r\n` |
//! | `Info` | `\r\n` (or the custom tag) |
//! | `Elem` | `)` (or the custom tag), `\r\n` |
//!
//! Field readers stop at the active delimiter (outside quotes) or at the
//! scope's stop tag. Once the stop tag of the current scope has been seen,
//! readers return `None` without recording an error.

use std::time::Instant;

use modemat_core::constants::{MAX_INT_FIELD_LEN, QUOTE};
use modemat_core::{AtError, DeviceError, Result, UrcPriority};
use tracing::{trace, warn};

use crate::engine::AtEngine;
use crate::matcher::{StopTagSet, StopTags, TagKind};

/// Longest text kept after `+CME ERROR:` / `+CMS ERROR:`.
const MAX_ERROR_TEXT: usize = modemat_core::constants::MAX_ERROR_FIELD_LEN;

/// Nesting level of the response being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Scope {
    #[default]
    NotSet,
    Resp,
    Info,
    Elem,
}

/// Options of [`AtEngine::resp_start_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespOptions {
    /// Dispatch registered URCs met while scanning.
    pub check_urc: bool,

    /// The prefixed row is the last line of the response; no final result
    /// code follows it.
    pub stop: bool,
}

impl Default for RespOptions {
    fn default() -> Self {
        Self {
            check_urc: true,
            stop: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RowState {
    pub scope: Scope,
    pub resp_found: bool,
    pub info_found: bool,
    pub elem_found: bool,
    /// A row was found but not yet reported by `info_resp`.
    pub prefix_matched: bool,
    pub final_row: bool,
    /// Skip one `' '` before the first field of a row.
    pub pending_space: bool,
}

impl AtEngine {
    // ------------------------------------------------------------------------
    // Response framing
    // ------------------------------------------------------------------------

    /// Start reading a response, looking for rows that begin with `prefix`.
    ///
    /// With no prefix, the first non-empty line that is neither a URC nor a
    /// final result code is taken as the row.
    pub fn resp_start(&mut self, prefix: Option<&str>) {
        self.resp_start_with(prefix, RespOptions::default());
    }

    pub fn resp_start_with(&mut self, prefix: Option<&str>, options: RespOptions) {
        self.row = RowState {
            scope: Scope::Resp,
            final_row: options.stop,
            ..RowState::default()
        };
        self.prefix = prefix
            .filter(|p| !p.is_empty())
            .map(|p| p.as_bytes().to_vec());
        self.check_urc = options.check_urc;
        self.tags.reset();
        trace!(transport = self.transport_name(), ?prefix, "AT response start");

        self.restart_clock();
        self.sticky(|at| at.scan_resp().map(|_| ()));
    }

    /// Finish the response: skip what the caller did not read, then consume
    /// and classify the final result code.
    ///
    /// Runs even with an error pending, in which case it only resets the
    /// scanner.
    pub fn resp_stop(&mut self) {
        match self.last_error() {
            None => {
                self.sticky(Self::finish_response);
            }
            Some(error) if leaves_stream_aligned(error) => self.drain_response(),
            Some(_) => {}
        }
        if let Some(error) = self.last_error() {
            trace!(transport = self.transport_name(), %error, "AT response stop with error");
        }
        self.reset_response_state();
        self.last_response_stop = Some(Instant::now());
    }

    /// Returns true if another row is available.
    ///
    /// The first call after a successful `resp_start` reports the row found
    /// there; later calls skip the rest of the current row and look for the
    /// next one.
    pub fn info_resp(&mut self) -> bool {
        self.sticky(Self::scan_info_resp).unwrap_or(false)
    }

    /// Returns true if the current row continues with an element opened by
    /// `open` (skipping one delimiter before it). Closes the previous element
    /// first.
    pub fn info_elem(&mut self, open: u8) -> bool {
        self.sticky(|at| {
            at.close_elem()?;
            if at.row.scope != Scope::Info || at.row.info_found {
                return Ok(false);
            }
            at.skip_pending_space()?;
            if at.scan_consume_char(open)? {
                at.set_scope(Scope::Elem);
                return Ok(true);
            }
            Ok(false)
        })
        .unwrap_or(false)
    }

    /// Consume the next byte if it is `c`, skipping one delimiter first.
    pub fn consume_char(&mut self, c: u8) -> bool {
        self.sticky(|at| at.scan_consume_char(c)).unwrap_or(false)
    }

    /// Consume input until a stop tag of the current scope completes.
    ///
    /// Returns false on timeout or transport failure.
    pub fn consume_to_stop_tag(&mut self) -> bool {
        if self.last_error().is_some() {
            return false;
        }
        if self.scope_stop_found() {
            return true;
        }

        let dispatch = self.check_urc && matches!(self.row.scope, Scope::NotSet | Scope::Resp);
        match self.consume_until_tag(dispatch) {
            Ok(kind) => {
                if let Err(error) = self.on_stop(kind) {
                    self.set_error(error);
                }
                true
            }
            Err(error) => {
                self.set_error(error);
                false
            }
        }
    }

    /// Replace the stop tag of the current scope until `resp_stop`.
    ///
    /// Before `resp_start` (or in the `Resp` scope) the tag takes the place
    /// of `OK\r\n`. An empty tag restores the default.
    pub fn set_stop_tag(&mut self, tag: &str) {
        let custom = Some(tag.as_bytes()).filter(|t| !t.is_empty());
        match self.row.scope {
            Scope::NotSet | Scope::Resp => self.tags.resp = StopTagSet::response(custom),
            Scope::Info => self.tags.info = StopTagSet::info(custom),
            Scope::Elem => self.tags.elem = StopTagSet::element(custom),
        }
    }

    pub fn scope(&self) -> Scope {
        self.row.scope
    }

    // ------------------------------------------------------------------------
    // Field readers
    // ------------------------------------------------------------------------

    /// Read the next field as text, at most `max_len` bytes.
    ///
    /// Quotes are removed; a delimiter inside quotes is part of the field.
    /// A longer field is truncated and the rest of it skipped.
    pub fn read_string(&mut self, max_len: usize) -> Option<String> {
        self.sticky(|at| at.scan_string(max_len, false)).flatten()
    }

    /// Like [`read_string`](Self::read_string), but also reads after the
    /// current scope's stop tag has been seen.
    pub fn read_string_after_stop(&mut self, max_len: usize) -> Option<String> {
        self.sticky(|at| at.scan_string(max_len, true)).flatten()
    }

    /// Read the next field as a decimal integer.
    ///
    /// A missing or non-numeric field is a malformed response.
    pub fn read_int(&mut self) -> Option<i32> {
        self.sticky(|at| {
            let field = at
                .scan_string(MAX_INT_FIELD_LEN, false)?
                .ok_or_else(|| AtError::malformed("missing integer field"))?;
            let text = field.trim();
            text.parse::<i32>()
                .map_err(|_| AtError::malformed(format!("not an integer: {text:?}")))
        })
    }

    /// Read exactly `len` raw bytes, ignoring delimiters, quotes and stop
    /// tags.
    pub fn read_bytes(&mut self, len: usize) -> Option<Vec<u8>> {
        self.sticky(|at| {
            at.skip_pending_space()?;
            let mut bytes = Vec::with_capacity(len);
            for _ in 0..len {
                bytes.push(at.next_byte()?);
            }
            Ok(bytes)
        })
    }

    /// Read a hex-encoded field and decode at most `max_len` bytes.
    ///
    /// An odd trailing nibble is dropped.
    pub fn read_hex_string(&mut self, max_len: usize) -> Option<Vec<u8>> {
        self.sticky(|at| {
            let Some(field) = at.scan_field_checked(max_len.saturating_mul(2), false)? else {
                return Ok(None);
            };
            decode_hex(&field).map(Some)
        })
        .flatten()
    }

    /// Skip `count` delimited fields.
    pub fn skip_param(&mut self, count: usize) {
        self.sticky(|at| {
            for _ in 0..count {
                if at.scope_stop_found() {
                    break;
                }
                at.scan_field(0)?;
            }
            Ok(())
        });
    }

    /// Skip `count` fixed-length fields of `len` raw bytes each.
    pub fn skip_param_len(&mut self, len: usize, count: usize) {
        self.sticky(|at| {
            at.skip_pending_space()?;
            for _ in 0..len.saturating_mul(count) {
                at.next_byte()?;
            }
            Ok(())
        });
    }

    // ------------------------------------------------------------------------
    // Scanning internals
    // ------------------------------------------------------------------------

    pub(crate) fn reset_response_state(&mut self) {
        self.row = RowState::default();
        self.prefix = None;
        self.check_urc = true;
        self.tags = StopTags::default();
    }

    fn set_scope(&mut self, scope: Scope) {
        if scope > self.row.scope {
            match scope {
                Scope::Resp => self.row.resp_found = false,
                Scope::Info => {
                    self.row.info_found = false;
                    self.row.pending_space = true;
                }
                Scope::Elem => self.row.elem_found = false,
                Scope::NotSet => {}
            }
        }
        trace!(from = ?self.row.scope, to = ?scope, "AT scope");
        self.row.scope = scope;
    }

    pub(crate) fn scope_stop_found(&self) -> bool {
        match self.row.scope {
            Scope::NotSet | Scope::Resp => self.row.resp_found,
            Scope::Info => self.row.info_found,
            Scope::Elem => self.row.elem_found,
        }
    }

    fn set_scope_stop_found(&mut self, found: bool) {
        match self.row.scope {
            Scope::NotSet | Scope::Resp => self.row.resp_found = found,
            Scope::Info => self.row.info_found = found,
            Scope::Elem => self.row.elem_found = found,
        }
    }

    fn current_tags_mut(&mut self) -> &mut StopTagSet {
        match self.row.scope {
            Scope::NotSet | Scope::Resp => &mut self.tags.resp,
            Scope::Info => &mut self.tags.info,
            Scope::Elem => &mut self.tags.elem,
        }
    }

    fn current_tags_in_progress(&self) -> bool {
        match self.row.scope {
            Scope::NotSet | Scope::Resp => self.tags.resp.has_progress(),
            Scope::Info => self.tags.info.has_progress(),
            Scope::Elem => self.tags.elem.has_progress(),
        }
    }

    /// Scan lines until a row or a final result code.
    ///
    /// Returns true with the scanner in `Info` when a row is found, false
    /// when the response ended.
    pub(crate) fn scan_resp(&mut self) -> Result<bool> {
        loop {
            let byte = self.peek_byte()?;
            if byte == b'\r' || byte == b'\n' {
                self.buffer.consume(1);
                continue;
            }

            if self.check_urc && self.urc_priority == UrcPriority::UrcFirst && self.match_urc()? {
                continue;
            }
            if let Some(prefix) = self.prefix.clone()
                && self.match_literal(&prefix)?
            {
                self.buffer.consume(prefix.len());
                self.enter_row();
                return Ok(true);
            }
            if self.check_urc
                && self.urc_priority == UrcPriority::ResponseFirst
                && self.match_urc()?
            {
                continue;
            }
            if let Some(kind) = self.match_terminal()? {
                self.on_terminal(kind)?;
                return Ok(false);
            }
            if self.prefix.is_none() {
                self.enter_row();
                return Ok(true);
            }

            trace!(transport = self.transport_name(), "AT skipping unexpected line");
            self.skip_line()?;
        }
    }

    fn enter_row(&mut self) {
        self.set_scope(Scope::Info);
        self.row.prefix_matched = true;
    }

    /// Match a final result code at the start of the current line and
    /// consume it.
    fn match_terminal(&mut self) -> Result<Option<TagKind>> {
        let candidates: Vec<(Vec<u8>, TagKind)> = self
            .tags
            .resp
            .tags()
            .iter()
            .map(|m| (m.tag().to_vec(), m.kind()))
            .collect();

        for (tag, kind) in candidates {
            if self.match_literal(&tag)? {
                self.buffer.consume(tag.len());
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    /// Classify a consumed final result code.
    fn on_terminal(&mut self, kind: TagKind) -> Result<()> {
        self.row.resp_found = true;
        match kind {
            TagKind::Error => {
                warn!(transport = self.transport_name(), "AT command returned ERROR");
                Err(AtError::ErrorResult)
            }
            TagKind::CmeError | TagKind::CmsError => {
                let code = self.read_error_code()?;
                let error = if kind == TagKind::CmeError {
                    DeviceError::cme(code)
                } else {
                    DeviceError::cms(code)
                };
                warn!(transport = self.transport_name(), %error, "AT command failed");
                self.set_device_error(error);
                Err(AtError::Modem(error))
            }
            TagKind::Ok | TagKind::Custom | TagKind::LineEnd | TagKind::ElemEnd => Ok(()),
        }
    }

    /// Rest of a `+CME ERROR:` line as a code; verbose text becomes `-1`.
    fn read_error_code(&mut self) -> Result<i32> {
        let mut text = Vec::new();
        loop {
            let byte = self.next_byte()?;
            if byte == b'\n' {
                break;
            }
            if text.len() < MAX_ERROR_TEXT {
                text.push(byte);
            }
        }
        let text = String::from_utf8_lossy(&text);
        Ok(text.trim().parse::<i32>().unwrap_or(-1))
    }

    /// Update scope flags after a stop tag completed.
    fn on_stop(&mut self, kind: TagKind) -> Result<()> {
        match self.row.scope {
            Scope::Elem => {
                self.row.elem_found = true;
                if kind == TagKind::LineEnd {
                    self.row.info_found = true;
                }
                Ok(())
            }
            Scope::Info => {
                self.row.info_found = true;
                Ok(())
            }
            Scope::NotSet | Scope::Resp => self.on_terminal(kind),
        }
    }

    fn skip_pending_space(&mut self) -> Result<()> {
        if self.row.pending_space {
            self.row.pending_space = false;
            if self.peek_byte()? == b' ' {
                self.buffer.consume(1);
            }
        }
        Ok(())
    }

    fn scan_string(&mut self, max_len: usize, after_stop: bool) -> Result<Option<String>> {
        Ok(self
            .scan_field_checked(max_len, after_stop)?
            .map(|field| String::from_utf8_lossy(&field).into_owned()))
    }

    /// `scan_field` guarded by the scope's stop state.
    fn scan_field_checked(&mut self, max_len: usize, after_stop: bool) -> Result<Option<Vec<u8>>> {
        let found = self.scope_stop_found();
        if found && !after_stop {
            return Ok(None);
        }
        if found {
            self.set_scope_stop_found(false);
        }
        let field = self.scan_field(max_len);
        if found {
            self.set_scope_stop_found(true);
        }
        field.map(Some)
    }

    /// Read one field, keeping at most `max_len` bytes of it.
    fn scan_field(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.skip_pending_space()?;
        let delimiter = self.delimiter;
        let mut field = Vec::new();
        let mut seen = 0usize;
        let mut in_quotes = false;
        self.current_tags_mut().reset();

        loop {
            let line_start = self.buffer.at_line_start();
            let byte = self.next_byte()?;

            if byte == QUOTE {
                in_quotes = !in_quotes;
                self.current_tags_mut().reset();
                continue;
            }
            if byte == delimiter && !in_quotes {
                break;
            }

            seen += 1;
            if field.len() < max_len {
                field.push(byte);
            }
            if let Some((kind, tag_len)) = self.current_tags_mut().feed(byte, line_start) {
                field.truncate(seen.saturating_sub(tag_len).min(max_len));
                self.on_stop(kind)?;
                break;
            }
        }
        Ok(field)
    }

    fn scan_consume_char(&mut self, c: u8) -> Result<bool> {
        let mut byte = self.peek_byte()?;
        if byte == self.delimiter && c != self.delimiter {
            self.buffer.consume(1);
            byte = self.peek_byte()?;
        }
        if byte == c {
            self.buffer.consume(1);
            return Ok(true);
        }
        Ok(false)
    }

    /// Consume bytes until a tag of the current scope completes.
    ///
    /// With `dispatch_urc`, registered URCs starting at a line boundary are
    /// handled on the way.
    fn consume_until_tag(&mut self, dispatch_urc: bool) -> Result<TagKind> {
        self.current_tags_mut().reset();
        loop {
            if dispatch_urc
                && !self.urcs.is_empty()
                && self.buffer.at_line_start()
                && !self.current_tags_in_progress()
                && self.match_urc()?
            {
                continue;
            }

            let line_start = self.buffer.at_line_start();
            let byte = self.next_byte()?;
            if let Some((kind, _)) = self.current_tags_mut().feed(byte, line_start) {
                return Ok(kind);
            }
        }
    }

    fn close_elem(&mut self) -> Result<()> {
        if self.row.scope == Scope::Elem {
            if !self.row.elem_found {
                let kind = self.consume_until_tag(false)?;
                self.on_stop(kind)?;
            }
            self.row.scope = Scope::Info;
        }
        Ok(())
    }

    fn close_info(&mut self) -> Result<()> {
        self.close_elem()?;
        if self.row.scope == Scope::Info {
            if !self.row.info_found {
                let kind = self.consume_until_tag(false)?;
                self.on_stop(kind)?;
            }
            self.row.scope = Scope::Resp;
        }
        Ok(())
    }

    fn scan_info_resp(&mut self) -> Result<bool> {
        if self.row.prefix_matched {
            self.row.prefix_matched = false;
            return Ok(true);
        }
        if self.row.resp_found || self.row.scope == Scope::NotSet {
            return Ok(false);
        }

        self.close_info()?;
        if self.row.final_row {
            self.row.resp_found = true;
            return Ok(false);
        }
        let found = self.scan_resp()?;
        self.row.prefix_matched = false;
        Ok(found)
    }

    /// Consume the rest of the response while keeping the pending error.
    fn drain_response(&mut self) {
        let pending = self.take_error();
        if let Err(error) = self.finish_response() {
            trace!(transport = self.transport_name(), %error, "AT response drain failed");
        }
        if let Some(pending) = pending {
            self.set_error(pending);
        }
    }

    fn finish_response(&mut self) -> Result<()> {
        self.close_info()?;
        if self.row.final_row || self.row.resp_found {
            return Ok(());
        }
        if self.row.scope == Scope::NotSet {
            self.row.scope = Scope::Resp;
        }
        let kind = self.consume_until_tag(self.check_urc)?;
        self.on_terminal(kind)
    }
}

/// Errors raised by field parsing leave the modem output intact, so the rest
/// of the response can still be consumed up to its final result.
fn leaves_stream_aligned(error: &AtError) -> bool {
    matches!(
        error,
        AtError::Malformed(_) | AtError::Overflow | AtError::InvalidParameter(_)
    )
}

fn decode_hex(field: &[u8]) -> Result<Vec<u8>> {
    if let Some(&bad) = field.iter().find(|b| !b.is_ascii_hexdigit()) {
        return Err(AtError::malformed(format!(
            "invalid hex digit {:?}",
            char::from(bad)
        )));
    }
    Ok(field
        .chunks_exact(2)
        .map(|pair| (nibble(pair[0]) << 4) | nibble(pair[1]))
        .collect())
}

fn nibble(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}
