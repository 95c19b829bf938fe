//! Fixed-capacity circular byte buffer used as per-agent scrollback.
//!
//! Single-writer / multi-reader snapshot: the owning session serializes all
//! writes, and `read()` hands back an independent copy so a subscriber can
//! be handed a snapshot without holding any lock across the send.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

/// Fixed-capacity circular byte buffer in chronological write order.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    capacity: usize,
    cursor: usize,
    full: bool,
}

impl RingBuffer {
    /// Allocate a zero-filled backing array of the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            cursor: 0,
            full: false,
        }
    }

    /// Write `data` into the buffer, wrapping and overwriting the oldest
    /// bytes as needed. If `data` is at least as large as the capacity, the
    /// buffer is replaced wholesale with the last `capacity` bytes of
    /// `data` and marked full.
    pub fn write(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }

        if data.len() >= self.capacity {
            let tail = &data[data.len() - self.capacity..];
            self.buf.copy_from_slice(tail);
            self.cursor = 0;
            self.full = true;
            return;
        }

        let first = (self.capacity - self.cursor).min(data.len());
        self.buf[self.cursor..self.cursor + first].copy_from_slice(&data[..first]);
        let remaining = &data[first..];
        if !remaining.is_empty() {
            self.buf[..remaining.len()].copy_from_slice(remaining);
        }

        let new_cursor = self.cursor + data.len();
        if new_cursor >= self.capacity {
            self.full = true;
        }
        self.cursor = new_cursor % self.capacity;
    }

    /// Return a copy of all stored bytes in chronological order.
    pub fn read(&self) -> Vec<u8> {
        if !self.full {
            self.buf[..self.cursor].to_vec()
        } else {
            let mut out = Vec::with_capacity(self.capacity);
            out.extend_from_slice(&self.buf[self.cursor..]);
            out.extend_from_slice(&self.buf[..self.cursor]);
            out
        }
    }

    /// Base64 (standard alphabet) encoding of `read()`.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.read())
    }

    /// Number of bytes currently stored (capped at capacity).
    pub fn length(&self) -> usize {
        if self.full {
            self.capacity
        } else {
            self.cursor
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_reads_empty() {
        let rb = RingBuffer::new(16);
        assert_eq!(rb.read(), Vec::<u8>::new());
        assert_eq!(rb.length(), 0);
    }

    #[test]
    fn write_below_capacity_preserves_order() {
        let mut rb = RingBuffer::new(16);
        rb.write(b"hello");
        rb.write(b" world");
        assert_eq!(rb.read(), b"hello world");
        assert_eq!(rb.length(), 11);
    }

    #[test]
    fn write_of_exactly_capacity_marks_full_cursor_zero() {
        let mut rb = RingBuffer::new(8);
        rb.write(b"abcdefgh");
        assert_eq!(rb.length(), 8);
        assert_eq!(rb.read(), b"abcdefgh");
        // cursor wrapped to 0; a subsequent 1-byte write lands at index 0.
        rb.write(b"X");
        assert_eq!(rb.read(), b"bcdefghX");
    }

    #[test]
    fn write_exceeding_capacity_keeps_tail() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"0123456789");
        assert_eq!(rb.read(), b"6789");
        assert_eq!(rb.length(), 4);
    }

    #[test]
    fn wraparound_across_multiple_writes() {
        let mut rb = RingBuffer::new(5);
        rb.write(b"abc");
        rb.write(b"de");
        assert_eq!(rb.read(), b"abcde");
        rb.write(b"fg");
        assert_eq!(rb.read(), b"cdefg");
    }

    #[test]
    fn to_base64_matches_standard_encoding() {
        let mut rb = RingBuffer::new(16);
        rb.write(b"hi");
        assert_eq!(rb.to_base64(), BASE64_STANDARD.encode(b"hi"));
    }

    #[test]
    fn length_is_min_of_total_written_and_capacity() {
        let mut rb = RingBuffer::new(10);
        rb.write(b"12345");
        assert_eq!(rb.length(), 5);
        rb.write(b"1234567890");
        assert_eq!(rb.length(), 10);
    }
}
