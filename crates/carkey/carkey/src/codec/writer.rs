use bytes::{BufMut, Bytes, BytesMut};

/// Message builder. Fields are appended in wire order, big-endian.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append one byte
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a big-endian `u16`
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    /// Append a big-endian `u32`
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a boolean byte
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(u8::from(value))
    }

    /// Append raw bytes
    pub fn put_slice(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Append bytes behind a `u32` length prefix
    pub fn put_prefixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u32(bytes.len() as u32).put_slice(bytes)
    }

    /// Append bytes behind a `u16` length prefix
    pub fn put_prefixed_u16(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u16(bytes.len() as u16).put_slice(bytes)
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the written bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish and return the message
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
