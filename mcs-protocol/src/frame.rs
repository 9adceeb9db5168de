//! MCS frame format.
//!
//! ```text
//! first frame:  [version: 1][tag: 1][size: varint32 (1-5)][payload: size]
//! later frames:              [tag: 1][size: varint32 (1-5)][payload: size]
//! ```
//!
//! The version byte is written once per connection, in front of the login
//! request. A size of zero is a valid stanza with every field defaulted.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{BufMut, Bytes, BytesMut};

/// Maximum number of bytes a varint32 length prefix may occupy.
pub const MAX_VARINT32_LEN: usize = 5;

/// Outcome of reading a varint32 from the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Varint {
    /// The varint terminated after `len` bytes.
    Complete { value: u32, len: usize },
    /// The buffer ended mid-varint after `consumed` continuation bytes.
    Incomplete { consumed: usize },
}

/// Reads a little-endian base-128 varint32 from the front of `buf`.
pub fn read_varint32(buf: &[u8]) -> Result<Varint, ProtocolError> {
    let mut value: u32 = 0;
    for (i, byte) in buf.iter().take(MAX_VARINT32_LEN).enumerate() {
        value |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Varint::Complete { value, len: i + 1 });
        }
    }

    if buf.len() >= MAX_VARINT32_LEN {
        return Err(ProtocolError::VarintTooLong {
            max: MAX_VARINT32_LEN,
        });
    }
    Ok(Varint::Incomplete {
        consumed: buf.len(),
    })
}

/// Appends `value` as a varint32.
pub fn put_varint32(buf: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// A single tagged frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Registry tag of the payload.
    pub tag: u8,
    /// Encoded stanza bytes.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: u8, payload: Bytes) -> Self {
        Self { tag, payload }
    }

    /// Encodes `[tag][size][payload]`.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(1 + MAX_VARINT32_LEN + self.payload.len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encodes `[version][tag][size][payload]`, the first frame of a connection.
    pub fn encode_with_version(&self, version: u8) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(2 + MAX_VARINT32_LEN + self.payload.len());
        buf.put_u8(version);
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let size = self.payload.len();
        if size > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: size.min(u32::MAX as usize) as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        buf.put_u8(self.tag);
        put_varint32(buf, size as u32);
        buf.put_slice(&self.payload);
        Ok(())
    }
}
