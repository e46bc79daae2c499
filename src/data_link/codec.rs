//! Little-endian payload codec.
//!
//! The bus carries multi-byte fields least significant byte first. Device
//! messages implement [`WireDecode`] / [`WireEncode`] against a
//! [`PayloadReader`] / [`PayloadWriter`] and only ever see host-native values.

use super::{Frame, MAX_PAYLOAD};
use crate::error::{CanError, Result};

/// Message types that can be read out of a received payload
pub trait WireDecode: Sized {
    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self>;
}

/// Message types that can be written into a transmit payload
pub trait WireEncode {
    fn encode(&self, writer: &mut PayloadWriter) -> Result<()>;
}

/// Sequential reader over a received payload
#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CanError::PayloadTooShort {
                needed: self.pos + n,
                available: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.bytes().map(u16::from_le_bytes)
    }

    pub fn i16(&mut self) -> Result<i16> {
        self.bytes().map(i16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.bytes().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.bytes().map(i32::from_le_bytes)
    }
}

/// Sequential writer into a fixed-length transmit payload
///
/// Bytes that are not written stay zero.
#[derive(Debug)]
pub struct PayloadWriter {
    buf: [u8; MAX_PAYLOAD],
    len: usize,
    pos: usize,
}

impl PayloadWriter {
    pub fn new(len: usize) -> Result<Self> {
        if len > MAX_PAYLOAD {
            return Err(CanError::PayloadTooLong { len });
        }
        Ok(Self {
            buf: [0; MAX_PAYLOAD],
            len,
            pos: 0,
        })
    }

    fn reserve(&mut self, n: usize) -> Result<&mut [u8]> {
        if self.pos + n > self.len {
            return Err(CanError::PayloadTooLong { len: self.pos + n });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&mut self.buf[start..start + n])
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn pad(&mut self, n: usize, byte: u8) -> Result<()> {
        self.reserve(n)?.fill(byte);
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put_bytes(&[value])
    }

    pub fn put_i8(&mut self, value: i8) -> Result<()> {
        self.put_u8(value as u8)
    }

    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_i16(&mut self, value: i16) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn written(&self) -> usize {
        self.pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

macro_rules! impl_wire_primitive {
    ($($ty:ty => $get:ident, $put:ident;)*) => {
        $(
            impl WireDecode for $ty {
                fn decode(reader: &mut PayloadReader<'_>) -> Result<Self> {
                    reader.$get()
                }
            }

            impl WireEncode for $ty {
                fn encode(&self, writer: &mut PayloadWriter) -> Result<()> {
                    writer.$put(*self)
                }
            }
        )*
    };
}

impl_wire_primitive! {
    u8 => u8, put_u8;
    i8 => i8, put_i8;
    u16 => u16, put_u16;
    i16 => i16, put_i16;
    u32 => u32, put_u32;
    i32 => i32, put_i32;
}

impl<const N: usize> WireEncode for [u8; N] {
    fn encode(&self, writer: &mut PayloadWriter) -> Result<()> {
        writer.put_bytes(self)
    }
}

impl WireEncode for [u8] {
    fn encode(&self, writer: &mut PayloadWriter) -> Result<()> {
        writer.put_bytes(self)
    }
}

impl Frame {
    /// Decodes the payload as `T`
    pub fn decode<T: WireDecode>(&self) -> Result<T> {
        T::decode(&mut PayloadReader::new(self.payload()))
    }

    /// Re-encodes the payload from `source`, keeping the frame length
    pub fn encode_from<T: WireEncode + ?Sized>(&mut self, source: &T) -> Result<()> {
        let mut writer = PayloadWriter::new(self.len())?;
        source.encode(&mut writer)?;
        self.set_payload(writer.as_slice())
    }
}
