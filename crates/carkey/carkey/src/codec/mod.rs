//! Binary codec for protocol messages.
//!
//! Two layers:
//!
//! - Offset-based helpers ([`write_u16`], [`read_u32`], [`copy_bytes`], ...) that encode
//!   fixed-width big-endian integers into caller-owned buffers. An out-of-range offset is
//!   a programming error and panics.
//! - [`Writer`] and [`Reader`], a builder and a bounds-checked cursor used to frame whole
//!   messages. Every read on a [`Reader`] returns a [`DecodeError`] instead of panicking,
//!   since the bytes come from the peer.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// Error decoding a message received from a peer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes remain than the field needs
    #[error("truncated {field}: need {needed} bytes, {available} available")]
    Truncated {
        /// Field being read
        field: &'static str,
        /// Bytes the field needs
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// A length prefix exceeds the field's declared maximum
    #[error("{field} length {len} exceeds maximum {max}")]
    Oversized {
        /// Field being read
        field: &'static str,
        /// Declared length
        len: usize,
        /// Maximum for the field
        max: usize,
    },

    /// Bytes left over after the last field
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// A field holds a value that is not allowed
    #[error("invalid {0}")]
    InvalidValue(&'static str),
}

/// Write a big-endian `u16` at `offset`
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset] = (value >> 8) as u8;
    buf[offset + 1] = value as u8;
}

/// Read a big-endian `u16` at `offset`
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    (u16::from(buf[offset]) << 8) | u16::from(buf[offset + 1])
}

/// Write a big-endian `i16` at `offset`
pub fn write_i16(buf: &mut [u8], offset: usize, value: i16) {
    write_u16(buf, offset, value as u16);
}

/// Read a big-endian `i16` at `offset`
pub fn read_i16(buf: &[u8], offset: usize) -> i16 {
    read_u16(buf, offset) as i16
}

/// Write a big-endian `u32` at `offset`
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset] = (value >> 24) as u8;
    buf[offset + 1] = (value >> 16) as u8;
    buf[offset + 2] = (value >> 8) as u8;
    buf[offset + 3] = value as u8;
}

/// Read a big-endian `u32` at `offset`
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    (u32::from(buf[offset]) << 24)
        | (u32::from(buf[offset + 1]) << 16)
        | (u32::from(buf[offset + 2]) << 8)
        | u32::from(buf[offset + 3])
}

/// Write a big-endian `i32` at `offset`
pub fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    write_u32(buf, offset, value as u32);
}

/// Read a big-endian `i32` at `offset`
pub fn read_i32(buf: &[u8], offset: usize) -> i32 {
    read_u32(buf, offset) as i32
}

/// Write a boolean as one byte (`0x01` / `0x00`)
pub fn write_bool(buf: &mut [u8], offset: usize, value: bool) {
    buf[offset] = u8::from(value);
}

/// Read a boolean; any non-zero byte is `true`
pub fn read_bool(buf: &[u8], offset: usize) -> bool {
    buf[offset] != 0
}

/// Copy `len` bytes from `src[src_offset..]` into `dst[dst_offset..]`.
///
/// Panics if either range is out of bounds.
pub fn copy_bytes(src: &[u8], src_offset: usize, dst: &mut [u8], dst_offset: usize, len: usize) {
    let src = &src[src_offset..src_offset + len];
    let dst = &mut dst[dst_offset..dst_offset + len];
    for (to, from) in dst.iter_mut().zip(src) {
        *to = *from;
    }
}

/// Concatenate byte arrays into one freshly sized buffer
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let total = parts.iter().map(|part| part.len()).sum();
    let mut out = vec![0u8; total];
    let mut offset = 0;
    for part in parts {
        copy_bytes(part, 0, &mut out, offset, part.len());
        offset += part.len();
    }
    out
}
