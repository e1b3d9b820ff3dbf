//! Fixed-capacity receive buffer with independent read/write cursors.
//!
//! Each side of the bridge owns one `PacketBuffer`. Incoming bytes land in
//! the writable tail, complete packets are consumed from the readable head,
//! and `compact` reclaims the space in between. The buffer never grows: a
//! packet whose declared length exceeds the capacity can never be assembled
//! (the bridge treats that as stream desynchronization).

/// Byte window over an owned region of fixed capacity.
///
/// The cursors satisfy `read <= write <= capacity` at all times; the
/// operations below enforce this, so a violation is a caller bug.
#[derive(Debug)]
pub struct PacketBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl PacketBuffer {
    /// Allocate a buffer of `capacity` bytes with both cursors at zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of buffered bytes not yet consumed.
    pub fn read_len(&self) -> usize {
        self.write - self.read
    }

    /// Free space at the tail.
    pub fn write_len(&self) -> usize {
        self.data.len() - self.write
    }

    /// Unconsumed bytes, in arrival order.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Mutable tail region for the next incoming read.
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    /// Commit `n` bytes just written into `writable`.
    pub fn advance_write(&mut self, n: usize) {
        assert!(n <= self.write_len(), "write cursor past capacity");
        self.write += n;
    }

    /// Consume `n` bytes from the head of `readable`.
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.read_len(), "read cursor past write cursor");
        self.read += n;
    }

    /// Reset both cursors, discarding all buffered bytes.
    ///
    /// A reconnected socket starts a fresh logical stream, so whatever
    /// the previous connection left behind must not leak into it.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Move the unconsumed bytes to offset zero, reclaiming tail space.
    ///
    /// Must run before a write-size computation that feeds an incoming
    /// read, otherwise space freed by consumed packets stays unusable.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.data.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let buf = PacketBuffer::new(64);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.read_len(), 0);
        assert_eq!(buf.write_len(), 64);
        assert!(buf.readable().is_empty());
    }

    #[test]
    fn test_cursor_invariant_holds() {
        let mut buf = PacketBuffer::new(16);
        buf.writable()[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        buf.advance_write(8);
        assert_eq!(buf.read_len(), 8);
        assert_eq!(buf.write_len(), 8);

        buf.advance_read(3);
        assert_eq!(buf.read_len(), 5);
        assert_eq!(buf.readable(), &[4, 5, 6, 7, 8]);

        buf.compact();
        assert_eq!(buf.read_len(), 5);
        assert_eq!(buf.write_len(), 11);

        buf.advance_read(5);
        assert_eq!(buf.read_len(), 0);
    }

    #[test]
    fn test_compact_preserves_content() {
        let mut buf = PacketBuffer::new(8);
        buf.writable().copy_from_slice(&[9, 8, 7, 6, 5, 4, 3, 2]);
        buf.advance_write(8);
        buf.advance_read(6);
        assert_eq!(buf.write_len(), 0);

        buf.compact();
        assert_eq!(buf.readable(), &[3, 2]);
        assert_eq!(buf.write_len(), 6);
    }

    #[test]
    fn test_compact_when_already_at_zero() {
        let mut buf = PacketBuffer::new(8);
        buf.writable()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.advance_write(4);
        buf.compact();
        assert_eq!(buf.readable(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_clear_discards_buffered_bytes() {
        let mut buf = PacketBuffer::new(8);
        buf.writable()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.advance_write(4);
        buf.advance_read(1);

        buf.clear();
        assert_eq!(buf.read_len(), 0);
        assert_eq!(buf.write_len(), 8);
        assert!(buf.readable().is_empty());
    }

    #[test]
    #[should_panic(expected = "write cursor past capacity")]
    fn test_advance_write_past_capacity_panics() {
        let mut buf = PacketBuffer::new(4);
        buf.advance_write(5);
    }

    #[test]
    #[should_panic(expected = "read cursor past write cursor")]
    fn test_advance_read_past_write_panics() {
        let mut buf = PacketBuffer::new(4);
        buf.advance_write(2);
        buf.advance_read(3);
    }
}
