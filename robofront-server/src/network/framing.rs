//! Packet Framing
//!
//! Each packet on the stream is `[u16 big-endian length][payload]`.
//! [`FrameReader`] turns a byte stream into payloads; [`FrameWriter`]
//! builds one length-prefixed frame.

use std::io::{self, Read};

use bytes::{Buf, Bytes, BytesMut};

use crate::network::codec::Encoder;

/// Bytes in the length prefix.
pub const LENGTH_PREFIX: usize = 2;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const READ_CHUNK: usize = 4096;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Payload does not fit the 16-bit length prefix.
    #[error("Payload of {0} bytes exceeds frame limit")]
    TooLarge(usize),
}

/// Outcome of draining a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Stream still open (possibly with zero new packets).
    Open,
    /// Remote closed the stream (zero-length read).
    Closed,
}

// =============================================================================
// READER
// =============================================================================

/// Rolling receive buffer that yields complete payloads.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    /// Empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered but not yet part of a complete packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append raw bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Read everything currently available and append complete payloads
    /// to `out`.
    ///
    /// Stops at `WouldBlock`. A zero-length read reports [`ReadStatus::Closed`]
    /// after extracting whatever complete packets were already buffered.
    pub fn receive<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        out: &mut Vec<Bytes>,
    ) -> io::Result<ReadStatus> {
        let mut chunk = [0u8; READ_CHUNK];
        let status = loop {
            match reader.read(&mut chunk) {
                Ok(0) => break ReadStatus::Closed,
                Ok(n) => self.push_bytes(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break ReadStatus::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.extract(out);
        Ok(status)
    }

    /// Move every complete payload into `out`, keeping any partial tail.
    pub fn extract(&mut self, out: &mut Vec<Bytes>) -> usize {
        let mut count = 0;
        while self.buf.len() >= LENGTH_PREFIX {
            let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
            if self.buf.len() < LENGTH_PREFIX + len {
                break;
            }
            self.buf.advance(LENGTH_PREFIX);
            out.push(self.buf.split_to(len).freeze());
            count += 1;
        }
        count
    }
}

// =============================================================================
// WRITER
// =============================================================================

/// Builds one frame: reserve the prefix, append fields, patch the length.
#[derive(Debug)]
pub struct FrameWriter {
    enc: Encoder,
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameWriter {
    /// Start a frame with the length prefix reserved.
    pub fn new() -> Self {
        Self {
            enc: Encoder::with_reserved(LENGTH_PREFIX),
        }
    }

    /// Encoder for the payload fields.
    pub fn encoder(&mut self) -> &mut Encoder {
        &mut self.enc
    }

    /// Patch the length prefix and return the whole frame.
    pub fn finish(mut self) -> Result<Bytes, FrameError> {
        let payload_len = self.enc.len() - LENGTH_PREFIX;
        if payload_len > MAX_PAYLOAD {
            return Err(FrameError::TooLarge(payload_len));
        }
        let prefix = (payload_len as u16).to_be_bytes();
        self.enc.as_bytes_mut()[..LENGTH_PREFIX].copy_from_slice(&prefix);
        Ok(self.enc.into_bytes())
    }
}

/// Frame an already-encoded payload.
pub fn frame_payload(payload: &[u8]) -> Result<Bytes, FrameError> {
    let mut writer = FrameWriter::new();
    writer.encoder().put_bytes(payload);
    writer.finish()
}
