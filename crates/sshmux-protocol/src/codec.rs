//! Payload primitives for the connection protocol
//!
//! All integers are big-endian. Strings are a `u32` length followed by that
//! many bytes. Type-specific trailers are the raw remainder of the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// A decoded transport message: numeric type tag plus payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message type tag
    pub message_type: u8,
    /// Payload following the tag
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(message_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }
}

/// Sequential reader over a message payload
#[derive(Debug, Clone)]
pub struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    /// Create a reader over `buf`
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into() }
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                expected: needed,
                actual: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a boolean byte (any non-zero value is true)
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian `u32`
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a length-prefixed byte string
    pub fn read_string(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Read a length-prefixed string that must be valid UTF-8
    pub fn read_utf8(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.read_string()?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidString { field })
    }

    /// Take everything that has not been read yet
    pub fn read_remaining(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

/// Builder for a message payload
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create a writer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append a single byte
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a boolean byte
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(u8::from(value))
    }

    /// Append a big-endian `u32`
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a length-prefixed byte string
    pub fn put_string(&mut self, value: impl AsRef<[u8]>) -> Result<&mut Self, ProtocolError> {
        let value = value.as_ref();
        let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLarge {
            size: value.len(),
            max: u32::MAX as usize,
        })?;
        self.buf.reserve(4 + value.len());
        self.buf.put_u32(len);
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Append raw bytes with no length prefix
    pub fn put_raw(&mut self, value: impl AsRef<[u8]>) -> &mut Self {
        self.buf.put_slice(value.as_ref());
        self
    }

    /// Finish and return the payload
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_layout() {
        let mut writer = PayloadWriter::new();
        writer.put_u32(7).put_string("ab").unwrap().put_bool(true);
        writer.put_raw([0xAA]);

        let bytes = writer.finish();
        assert_eq!(
            bytes.as_ref(),
            &[0, 0, 0, 7, 0, 0, 0, 2, b'a', b'b', 1, 0xAA][..]
        );
    }

    #[test]
    fn test_reader_fields() {
        let mut reader = PayloadReader::new(vec![0, 0, 1, 0, 0, 0, 0, 1, b'x', 5, 9, 9]);

        assert_eq!(reader.read_u32().unwrap(), 256);
        assert_eq!(reader.read_string().unwrap().as_ref(), b"x");
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_remaining().as_ref(), &[9, 9]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_truncated_integer() {
        let mut reader = PayloadReader::new(vec![0, 0, 1]);
        assert_eq!(
            reader.read_u32(),
            Err(ProtocolError::Truncated {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_reader_string_length_exceeds_payload() {
        let mut reader = PayloadReader::new(vec![0, 0, 0, 10, b'a', b'b']);
        assert_eq!(
            reader.read_string(),
            Err(ProtocolError::Truncated {
                expected: 10,
                actual: 2
            })
        );
    }

    #[test]
    fn test_reader_invalid_utf8() {
        let mut reader = PayloadReader::new(vec![0, 0, 0, 1, 0xFF]);
        assert_eq!(
            reader.read_utf8("request type"),
            Err(ProtocolError::InvalidString {
                field: "request type"
            })
        );
    }
}
