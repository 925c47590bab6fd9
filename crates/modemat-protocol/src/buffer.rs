//! Receive buffer for the AT engine.
//!
//! A bounded byte window filled on demand from the transport. Bytes are
//! consumed from the front; the buffer remembers the last consumed byte so the
//! scanner knows whether the next byte starts a new line.
//!
//! The capacity is a logical limit: `BytesMut` reclaims consumed space on its
//! own, so the window never needs explicit compaction.

use bytes::{Buf, BytesMut};

#[derive(Debug)]
pub struct RxBuffer {
    data: BytesMut,
    capacity: usize,
    last_consumed: Option<u8>,
}

impl RxBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            last_consumed: None,
        }
    }

    /// Unread bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn unread(&self) -> &[u8] {
        &self.data
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Returns true if the next unread byte begins a line.
    pub fn at_line_start(&self) -> bool {
        matches!(self.last_consumed, None | Some(b'\n'))
    }

    /// Consume one byte.
    pub fn next_byte(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.data.advance(1);
        self.last_consumed = Some(byte);
        Some(byte)
    }

    /// Consume `n` bytes (clamped to what is available).
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        if n == 0 {
            return;
        }
        self.last_consumed = Some(self.data[n - 1]);
        self.data.advance(n);
    }

    /// Append bytes produced by `read` into the free space.
    ///
    /// `read` receives a slice covering all free space and returns how many
    /// bytes it wrote. Returns the number of bytes appended.
    pub fn fill_with<E>(
        &mut self,
        read: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let start = self.data.len();
        let free = self.capacity.saturating_sub(start);
        if free == 0 {
            return Ok(0);
        }

        self.data.resize(start + free, 0);
        match read(&mut self.data[start..]) {
            Ok(n) => {
                let n = n.min(free);
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(err) => {
                self.data.truncate(start);
                Err(err)
            }
        }
    }

    /// Drop all unread bytes. The next byte is treated as a line start.
    pub fn clear(&mut self) {
        self.data.clear();
        self.last_consumed = None;
    }

    /// Drop unread bytes and give the allocation back.
    pub fn release(&mut self) {
        self.data = BytesMut::new();
        self.last_consumed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, bytes: &[u8]) -> RxBuffer {
        let mut buffer = RxBuffer::new(capacity);
        let n = buffer
            .fill_with::<()>(|free| {
                let n = bytes.len().min(free.len());
                free[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            })
            .unwrap();
        assert_eq!(n, bytes.len().min(capacity));
        buffer
    }

    #[test]
    fn test_fill_respects_capacity() {
        let buffer = filled(4, b"OK\r\nextra");
        assert!(buffer.is_full());
        assert_eq!(buffer.unread(), b"OK\r\n");
    }

    #[test]
    fn test_consume_tracks_line_start() {
        let mut buffer = filled(16, b"OK\r\nRING");
        assert!(buffer.at_line_start());

        assert_eq!(buffer.next_byte(), Some(b'O'));
        assert!(!buffer.at_line_start());

        buffer.consume(3);
        assert!(buffer.at_line_start());
        assert_eq!(buffer.peek(), Some(b'R'));
    }

    #[test]
    fn test_consumed_space_is_reused() {
        let mut buffer = filled(4, b"AB\r\n");
        buffer.consume(4);
        assert!(buffer.is_empty());

        let n = buffer
            .fill_with::<()>(|free| {
                assert_eq!(free.len(), 4);
                free[..2].copy_from_slice(b"OK");
                Ok(2)
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(buffer.unread(), b"OK");
    }

    #[test]
    fn test_failed_fill_keeps_content() {
        let mut buffer = filled(8, b"+CSQ");
        let result = buffer.fill_with(|_| Err("line dropped"));
        assert_eq!(result, Err("line dropped"));
        assert_eq!(buffer.unread(), b"+CSQ");
    }

    #[test]
    fn test_clear_resets_line_start() {
        let mut buffer = filled(8, b"+CSQ");
        buffer.consume(2);
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.at_line_start());
    }
}
