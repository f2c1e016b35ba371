//! Unit framing
//!
//! Every logical unit on a hub connection is an opaque block carried
//! inside one or more transport messages:
//! ```text
//! text   (json, negotiation):  ┌──────────────┬──────┐
//!                              │ payload      │ 0x1E │
//!                              └──────────────┴──────┘
//! binary (messagepack):        ┌──────────────┬──────────────┐
//!                              │ varint len   │ payload      │
//!                              └──────────────┴──────────────┘
//! ```
//! Binary payloads may legitimately contain `0x1E`, so they carry their
//! length instead of a trailing delimiter.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Protocol, Result};

/// Record separator terminating every text unit
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Largest unit accepted by default (1MB)
pub const MAX_UNIT_SIZE: usize = 1024 * 1024;

/// A 32-bit length never needs more than 5 varint bytes
const MAX_VARINT_BYTES: usize = 5;

/// Append a text unit (payload + record separator)
pub fn write_text_unit(buf: &mut BytesMut, payload: &[u8]) {
    buf.reserve(payload.len() + 1);
    buf.extend_from_slice(payload);
    buf.put_u8(RECORD_SEPARATOR);
}

/// Append a binary unit (varint length + payload)
pub fn write_binary_unit(buf: &mut BytesMut, payload: &[u8]) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(Error::UnitTooLarge(payload.len(), u32::MAX as usize));
    }

    let mut len = payload.len() as u32;
    buf.reserve(payload.len() + MAX_VARINT_BYTES);
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
    buf.extend_from_slice(payload);
    Ok(())
}

/// Frame a single payload for the given protocol
pub fn frame(protocol: Protocol, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(payload.len() + MAX_VARINT_BYTES);
    if protocol.is_binary() {
        write_binary_unit(&mut buf, payload)?;
    } else {
        write_text_unit(&mut buf, payload);
    }
    Ok(buf.freeze())
}

/// Accumulates inbound bytes and splits them into complete units
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    binary: bool,
    max_unit_size: usize,
}

impl FrameBuffer {
    /// Buffer for text units (negotiation phase or json protocol)
    pub fn text() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            binary: false,
            max_unit_size: MAX_UNIT_SIZE,
        }
    }

    /// Buffer for units of the given protocol
    pub fn for_protocol(protocol: Protocol) -> Self {
        let mut buffer = Self::text();
        buffer.binary = protocol.is_binary();
        buffer
    }

    pub fn with_max_unit_size(mut self, max: usize) -> Self {
        self.max_unit_size = max;
        self
    }

    /// Switch framing after negotiation. Already-buffered bytes are kept.
    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.binary = protocol.is_binary();
    }

    /// Append raw bytes received from the transport
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as a unit
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete unit, `Ok(None)` when more bytes are needed
    pub fn next_unit(&mut self) -> Result<Option<Bytes>> {
        if self.binary {
            self.next_binary_unit()
        } else {
            self.next_text_unit()
        }
    }

    fn next_text_unit(&mut self) -> Result<Option<Bytes>> {
        match self.buf.iter().position(|b| *b == RECORD_SEPARATOR) {
            Some(pos) => {
                if pos > self.max_unit_size {
                    return Err(Error::UnitTooLarge(pos, self.max_unit_size));
                }
                let unit = self.buf.split_to(pos).freeze();
                self.buf.advance(1);
                Ok(Some(unit))
            }
            None if self.buf.len() > self.max_unit_size => {
                Err(Error::UnitTooLarge(self.buf.len(), self.max_unit_size))
            }
            None => Ok(None),
        }
    }

    fn next_binary_unit(&mut self) -> Result<Option<Bytes>> {
        let mut len: usize = 0;
        let mut header = 0;

        loop {
            if header == self.buf.len() {
                return Ok(None);
            }
            if header == MAX_VARINT_BYTES {
                return Err(Error::Framing("length prefix exceeds 5 bytes".into()));
            }
            let byte = self.buf[header];
            len |= ((byte & 0x7f) as usize) << (7 * header);
            header += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }

        if len > self.max_unit_size {
            return Err(Error::UnitTooLarge(len, self.max_unit_size));
        }
        if self.buf.len() < header + len {
            return Ok(None);
        }

        self.buf.advance(header);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_prefix_lengths() {
        let mut buf = BytesMut::new();
        write_binary_unit(&mut buf, &[0u8; 127]).unwrap();
        assert_eq!(buf[0], 0x7f);
        assert_eq!(buf.len(), 128);

        let mut buf = BytesMut::new();
        write_binary_unit(&mut buf, &[0u8; 128]).unwrap();
        assert_eq!(&buf[..2], &[0x80, 0x01]);
        assert_eq!(buf.len(), 130);
    }

    #[test]
    fn test_text_unit_split_across_reads() {
        let mut frames = FrameBuffer::text();
        frames.extend(b"{\"type\":");
        assert!(frames.next_unit().unwrap().is_none());
        frames.extend(b"6}\x1e{}");
        assert_eq!(&frames.next_unit().unwrap().unwrap()[..], b"{\"type\":6}");
        assert!(frames.next_unit().unwrap().is_none());
        assert_eq!(frames.buffered(), 2);
    }

    #[test]
    fn test_oversized_text_unit_rejected() {
        let mut frames = FrameBuffer::text().with_max_unit_size(8);
        frames.extend(b"0123456789");
        assert!(matches!(frames.next_unit(), Err(Error::UnitTooLarge(10, 8))));
    }

    #[test]
    fn test_overlong_varint_rejected() {
        let mut frames = FrameBuffer::for_protocol(Protocol::MessagePack);
        frames.extend(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(matches!(frames.next_unit(), Err(Error::Framing(_))));
    }
}
