//! Binary Field Codec
//!
//! Big-endian fixed-width integers and length-prefixed UTF-8 strings.
//! Decoding never panics: every read checks the remaining length first.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Decoding errors. All of them are connection-scoped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A field needs more bytes than remain.
    #[error("Truncated packet: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the field needed.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    /// Packet tag not in the enumeration.
    #[error("Unknown packet tag {0}")]
    UnknownTag(u8),

    /// A field holds a value outside its domain.
    #[error("Invalid {field}: {value}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: i64,
    },

    /// Bytes left over after the last field.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

// =============================================================================
// ENCODER
// =============================================================================

/// Appends fields to a byte buffer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder whose buffer starts with `reserved` zero bytes.
    pub fn with_reserved(reserved: usize) -> Self {
        let mut buf = BytesMut::with_capacity(reserved + 64);
        buf.put_bytes(0, reserved);
        Self { buf }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the written bytes (for patching prefixes).
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Freeze into an immutable buffer.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// u8
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// i8
    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    /// u16, big-endian
    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    /// i16, big-endian
    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    /// i32, big-endian
    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Raw bytes, no prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// String with a u8 byte-length prefix (truncated to 255 bytes).
    pub fn put_str8(&mut self, value: &str) {
        let s = truncate_to(value, u8::MAX as usize);
        self.put_u8(s.len() as u8);
        self.put_bytes(s.as_bytes());
    }

    /// String with a u16 byte-length prefix (truncated to 65535 bytes).
    pub fn put_str16(&mut self, value: &str) {
        let s = truncate_to(value, u16::MAX as usize);
        self.put_u16(s.len() as u16);
        self.put_bytes(s.as_bytes());
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_to(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// =============================================================================
// DECODER
// =============================================================================

/// Cursor over a received payload.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Start decoding at the first byte.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    /// Fail if anything is left over.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(DecodeError::UnexpectedEnd { needed: n, remaining });
        }
        Ok(())
    }

    /// Take `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    /// u8
    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    /// i8
    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        self.need(1)?;
        Ok(self.data.get_i8())
    }

    /// u16, big-endian
    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.data.get_u16())
    }

    /// i16, big-endian
    pub fn i16(&mut self) -> Result<i16, DecodeError> {
        self.need(2)?;
        Ok(self.data.get_i16())
    }

    /// i32, big-endian
    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.data.get_i32())
    }

    /// 16-byte identity key.
    pub fn key(&mut self) -> Result<[u8; 16], DecodeError> {
        let mut out = [0u8; 16];
        out.copy_from_slice(self.bytes(16)?);
        Ok(out)
    }

    /// String with a u8 byte-length prefix.
    pub fn str8(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        self.utf8(len)
    }

    /// String with a u16 byte-length prefix.
    pub fn str16(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        self.utf8(len)
    }

    fn utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Non-negative i16 element count.
    pub fn count_i16(&mut self, field: &'static str) -> Result<usize, DecodeError> {
        let count = self.i16()?;
        if count < 0 {
            return Err(DecodeError::InvalidValue { field, value: count as i64 });
        }
        Ok(count as usize)
    }
}
