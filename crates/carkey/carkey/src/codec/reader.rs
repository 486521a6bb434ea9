use super::DecodeError;

/// Bounds-checked cursor over a received message.
///
/// Each read advances the cursor; a read past the end fails with
/// [`DecodeError::Truncated`] and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                field,
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N, field)?);
        Ok(out)
    }

    /// Read one byte
    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>(field)?[0])
    }

    /// Read a big-endian `u16`
    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        self.read_array(field).map(u16::from_be_bytes)
    }

    /// Read a big-endian `u32`
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.read_array(field).map(u32::from_be_bytes)
    }

    /// Read a boolean byte; any non-zero value is `true`
    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        self.read_u8(field).map(|b| b != 0)
    }

    /// Read a field prefixed with a `u32` length of at most `max` bytes
    pub fn read_prefixed(&mut self, max: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32(field)? as usize;
        self.read_bounded(len, max, field)
    }

    /// Read a field prefixed with a `u16` length of at most `max` bytes
    pub fn read_prefixed_u16(
        &mut self,
        max: usize,
        field: &'static str,
    ) -> Result<&'a [u8], DecodeError> {
        let len = usize::from(self.read_u16(field)?);
        self.read_bounded(len, max, field)
    }

    fn read_bounded(&mut self, len: usize, max: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if len > max {
            return Err(DecodeError::Oversized { field, len, max });
        }
        self.read_bytes(len, field)
    }

    /// Consume `literal`, failing if the next bytes differ
    pub fn expect_literal(&mut self, literal: &[u8], field: &'static str) -> Result<(), DecodeError> {
        if self.read_bytes(literal.len(), field)? == literal {
            Ok(())
        } else {
            Err(DecodeError::InvalidValue(field))
        }
    }

    /// Require that the whole buffer was consumed
    pub const fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reads() {
        let data = [0x12, 0x34, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0x01];
        let mut reader = Reader::new(&data);

        assert_eq!(reader.read_u16("nonce").unwrap(), 0x1234);
        assert_eq!(reader.read_prefixed(4, "signature").unwrap(), &[0xAA, 0xBB]);
        assert!(reader.read_bool("flag").unwrap());
        assert_eq!(reader.position(), data.len());
        reader.finish().unwrap();
    }

    #[test]
    fn test_truncated_read_does_not_advance() {
        let mut reader = Reader::new(&[0x01, 0x02, 0x03]);
        assert_eq!(
            reader.read_u32("counter"),
            Err(DecodeError::Truncated {
                field: "counter",
                needed: 4,
                available: 3
            })
        );
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u16("nonce").unwrap(), 0x0102);
    }

    #[test]
    fn test_oversized_prefix() {
        let mut reader = Reader::new(&[0x00, 0x00, 0x01, 0x00, 0xFF]);
        assert_eq!(
            reader.read_prefixed(64, "signature"),
            Err(DecodeError::Oversized {
                field: "signature",
                len: 256,
                max: 64
            })
        );
    }

    #[test]
    fn test_prefixed_u16() {
        let mut reader = Reader::new(&[0x00, 0x03, b'a', b'b', b'c']);
        assert_eq!(reader.read_prefixed_u16(16, "text").unwrap(), b"abc");
        reader.finish().unwrap();
    }

    #[test]
    fn test_literal_and_trailing_bytes() {
        let mut reader = Reader::new(b"Car?xy");
        reader.expect_literal(b"Car?", "literal").unwrap();
        assert_eq!(reader.clone().finish(), Err(DecodeError::TrailingBytes(2)));

        let mut reader = Reader::new(b"Car!");
        assert_eq!(
            reader.expect_literal(b"Car?", "literal"),
            Err(DecodeError::InvalidValue("literal"))
        );
    }
}
