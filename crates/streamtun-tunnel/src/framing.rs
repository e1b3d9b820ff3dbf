//! Packet boundary detection from the IPv4 header.
//!
//! The TCP stream carries raw IP packets back to back with no extra
//! framing. The only delimiter is the total-length field every IPv4
//! header already carries (bytes 2..4, big-endian), so the bridge peeks
//! at the buffered head to decide where each packet ends. Anything that
//! is not IPv4 means the stream has lost sync and the connection must
//! be restarted.

/// Minimum bytes needed before the total-length field can be trusted.
pub const IPV4_HEADER_LEN: usize = 20;

/// Outcome of inspecting the head of a byte stream for a packet boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Fewer than [`IPV4_HEADER_LEN`] bytes are available.
    NeedMore,
    /// The version nibble is not 4; the stream is desynchronized.
    NotV4,
    /// Declared total length of the packet at the head, in bytes.
    Size(usize),
}

/// Inspect the head of `data` for the next packet boundary.
///
/// Does not validate the declared length against the header minimum;
/// callers decide whether an implausible size is truncation or
/// desynchronization.
pub fn packet_size(data: &[u8]) -> Boundary {
    if data.len() < IPV4_HEADER_LEN {
        return Boundary::NeedMore;
    }
    if data[0] >> 4 != 4 {
        return Boundary::NotV4;
    }
    Boundary::Size(u16::from_be_bytes([data[2], data[3]]) as usize)
}

/// Overwrite the total-length field of the packet at the head of `data`.
///
/// Used when a TUN read returns fewer bytes than the header declares:
/// the kernel already truncated the packet, so the header is re-stamped
/// to match what was actually read before the bytes are forwarded.
pub fn stamp_packet_size(data: &mut [u8], size: usize) {
    debug_assert!(data.len() >= IPV4_HEADER_LEN);
    debug_assert!(size <= u16::MAX as usize);
    let bytes = (size as u16).to_be_bytes();
    data[2] = bytes[0];
    data[3] = bytes[1];
}
