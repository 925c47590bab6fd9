//! Incremental stop-tag matching.
//!
//! A response is terminated by one of several competing byte sequences
//! (`OK\r\n`, `ERROR\r\n`, `+CME ERROR:`, a caller-supplied tag...). Bytes
//! arrive in arbitrary chunks, so every tag is tracked by its own KMP
//! automaton whose state survives refills: feeding `"O"` then `"K\r\n"` is the
//! same as feeding `"OK\r\n"`.
//!
//! # Anchoring
//!
//! Final result codes are only meaningful at the start of a line. An
//! anchored tag may begin matching only on a byte that starts a line, which
//! keeps `ERROR\r\n` from matching the tail of `+CME ERROR: 3\r\n` and `OK`
//! from matching inside a data row such as `"BOOK\r\n"`.
//!
//! ```text
//! byte      B    O    O    K    \r   \n   O    K    \r   \n
//! line      ^                             ^
//! OK\r\n    -    -    -    -    -    -    1    2    3    4 ✓
//! ```

use modemat_core::constants::{CME_ERROR, CMS_ERROR, CRLF, ELEM_STOP, ERROR, OK};

/// What a completed tag means to the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Ok,
    Error,
    CmeError,
    CmsError,
    /// Caller-supplied stop tag.
    Custom,
    /// End of an information row.
    LineEnd,
    /// End of a parenthesised element.
    ElemEnd,
}

/// KMP automaton for one tag.
#[derive(Debug, Clone)]
pub struct TagMatcher {
    tag: Vec<u8>,
    failure: Vec<usize>,
    progress: usize,
    anchored: bool,
    kind: TagKind,
}

impl TagMatcher {
    pub fn new(tag: &[u8], kind: TagKind, anchored: bool) -> Self {
        Self {
            failure: failure_table(tag),
            tag: tag.to_vec(),
            progress: 0,
            anchored,
            kind,
        }
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    /// Bytes of the tag matched so far.
    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn reset(&mut self) {
        self.progress = 0;
    }

    /// Feed one byte; returns true when the tag completes.
    ///
    /// `line_start` tells whether `byte` is the first byte of a line.
    pub fn feed(&mut self, byte: u8, line_start: bool) -> bool {
        if self.tag.is_empty() {
            return false;
        }

        if self.anchored {
            // A restart inside a line can never be anchored.
            if self.progress > 0 && self.tag[self.progress] != byte {
                self.progress = 0;
            }
            if self.progress == 0 && !line_start {
                return false;
            }
        } else {
            while self.progress > 0 && self.tag[self.progress] != byte {
                self.progress = self.failure[self.progress - 1];
            }
        }

        if self.tag[self.progress] == byte {
            self.progress += 1;
        }
        if self.progress == self.tag.len() {
            self.progress = 0;
            return true;
        }
        false
    }
}

fn failure_table(tag: &[u8]) -> Vec<usize> {
    let mut failure = vec![0; tag.len()];
    let mut k = 0;
    for i in 1..tag.len() {
        while k > 0 && tag[i] != tag[k] {
            k = failure[k - 1];
        }
        if tag[i] == tag[k] {
            k += 1;
        }
        failure[i] = k;
    }
    failure
}

/// Ordered set of competing tags.
#[derive(Debug, Clone, Default)]
pub struct StopTagSet {
    tags: Vec<TagMatcher>,
}

impl StopTagSet {
    pub fn new(tags: Vec<TagMatcher>) -> Self {
        Self { tags }
    }

    /// Final result codes, with `custom` taking the place of `OK`.
    pub fn response(custom: Option<&[u8]>) -> Self {
        let first = match custom {
            Some(tag) => TagMatcher::new(tag, TagKind::Custom, false),
            None => TagMatcher::new(OK, TagKind::Ok, true),
        };
        Self::new(vec![
            first,
            TagMatcher::new(CME_ERROR, TagKind::CmeError, true),
            TagMatcher::new(CMS_ERROR, TagKind::CmsError, true),
            TagMatcher::new(ERROR, TagKind::Error, true),
        ])
    }

    /// End of an information row.
    pub fn info(custom: Option<&[u8]>) -> Self {
        let tag = match custom {
            Some(tag) => TagMatcher::new(tag, TagKind::Custom, false),
            None => TagMatcher::new(CRLF, TagKind::LineEnd, false),
        };
        Self::new(vec![tag])
    }

    /// End of an element, bounded by the end of the row.
    pub fn element(custom: Option<&[u8]>) -> Self {
        let tag = match custom {
            Some(tag) => TagMatcher::new(tag, TagKind::Custom, false),
            None => TagMatcher::new(ELEM_STOP, TagKind::ElemEnd, false),
        };
        Self::new(vec![tag, TagMatcher::new(CRLF, TagKind::LineEnd, false)])
    }

    /// Feed one byte to every tag; returns the first completed tag in set
    /// order and its length. All progress is cleared on a match.
    pub fn feed(&mut self, byte: u8, line_start: bool) -> Option<(TagKind, usize)> {
        let mut hit = None;
        for matcher in &mut self.tags {
            if matcher.feed(byte, line_start) && hit.is_none() {
                hit = Some((matcher.kind(), matcher.tag().len()));
            }
        }
        if hit.is_some() {
            self.reset();
        }
        hit
    }

    pub fn reset(&mut self) {
        self.tags.iter_mut().for_each(TagMatcher::reset);
    }

    /// Returns true while any tag is partially matched.
    pub fn has_progress(&self) -> bool {
        self.tags.iter().any(|m| m.progress() > 0)
    }

    /// Tags in match order.
    pub fn tags(&self) -> &[TagMatcher] {
        &self.tags
    }
}

/// Stop-tag sets for the three nested scopes of a response.
#[derive(Debug, Clone)]
pub struct StopTags {
    pub resp: StopTagSet,
    pub info: StopTagSet,
    pub elem: StopTagSet,
}

impl Default for StopTags {
    fn default() -> Self {
        Self {
            resp: StopTagSet::response(None),
            info: StopTagSet::info(None),
            elem: StopTagSet::element(None),
        }
    }
}

impl StopTags {
    pub fn reset(&mut self) {
        self.resp.reset();
        self.info.reset();
        self.elem.reset();
    }
}
