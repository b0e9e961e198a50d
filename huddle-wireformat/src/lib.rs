//! Compact binary encoding used for the payloads of calls made between huddle peers
//!
//! Multi-byte integers are written little endian, and variable length values (byte slices,
//! strings, vectors) are prefixed with their length as a `u32`

use bytes::BufMut;

pub use derives::{FromBytes, ToBytes};
pub use untrusted;

// Lets the derive macros refer to `::huddle_wireformat` from inside this crate's own tests
extern crate self as huddle_wireformat;

/// Type used to encode the length of variable-sized values
type LenType = u32;

/// Any buffer that encoded bytes may be written to
pub trait ByteWriter: BufMut {}
impl<B: BufMut> ByteWriter for B {}

/// Trait implemented by all types that can be written to a byte buffer
pub trait ToBytes {
    /// Write the encoded representation of this value to the given buffer
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError>;

    /// Estimated size in bytes of the encoded value, used to preallocate buffers
    fn size_hint(&self) -> usize {
        0
    }

    /// Shortcut to encode this value into a new buffer of bytes
    fn encode_to_vec(&self) -> Result<Vec<u8>, ToBytesError> {
        let mut buf = Vec::with_capacity(self.size_hint());
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

/// Trait implemented by all types that may be decoded from a buffer of bytes, possibly borrowing
/// from the buffer for the lifetime `'a`
pub trait FromBytes<'a>: Sized {
    /// Read an instance of `Self` from the given reader, leaving any bytes that follow it
    fn decode(reader: &mut untrusted::Reader<'a>) -> Result<Self, FromBytesError>;

    /// Decode an instance of `Self` that must span the entire slice
    fn decode_from_slice(slice: &'a [u8]) -> Result<Self, FromBytesError> {
        untrusted::Input::from(slice).read_all(FromBytesError::ExtraBytes, Self::decode)
    }
}

/// Any error that may occur when writing a value to bytes
#[derive(Debug, thiserror::Error)]
pub enum ToBytesError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Length {0} is too large to be encoded")]
    TooLong(usize),
}

/// Any error that may occur when reading a value from bytes
#[derive(Debug, thiserror::Error)]
pub enum FromBytesError {
    #[error("Unexpected end of input")]
    EndOfInput,
    #[error("Extra bytes remain after decoding")]
    ExtraBytes,
    #[error("Failed to parse value: {0}")]
    Parsing(String),
}

impl From<untrusted::EndOfInput> for FromBytesError {
    fn from(_: untrusted::EndOfInput) -> Self {
        Self::EndOfInput
    }
}

fn encode_len<W: ByteWriter>(len: usize, buf: &mut W) -> Result<(), ToBytesError> {
    let len = LenType::try_from(len).map_err(|_| ToBytesError::TooLong(len))?;
    len.encode(buf)
}

fn decode_len(reader: &mut untrusted::Reader<'_>) -> Result<usize, FromBytesError> {
    LenType::decode(reader).map(|len| len as usize)
}

macro_rules! int_bytes {
    ($($ty:ty),*) => {
        $(
            impl ToBytes for $ty {
                fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
                    buf.put_slice(&self.to_le_bytes());
                    Ok(())
                }

                fn size_hint(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }

            impl FromBytes<'_> for $ty {
                fn decode(reader: &mut untrusted::Reader<'_>) -> Result<Self, FromBytesError> {
                    let bytes = reader.read_bytes(std::mem::size_of::<$ty>())?;
                    let mut buf = [0u8 ; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes.as_slice_less_safe());
                    Ok(<$ty>::from_le_bytes(buf))
                }
            }
        )*
    };
}

int_bytes!{u8, u16, u32, u64, i64}

impl ToBytes for bool {
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
        (*self as u8).encode(buf)
    }

    fn size_hint(&self) -> usize {
        1
    }
}
impl FromBytes<'_> for bool {
    fn decode(reader: &mut untrusted::Reader<'_>) -> Result<Self, FromBytesError> {
        match u8::decode(reader)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FromBytesError::Parsing(format!("Invalid boolean tag {:X}", other))),
        }
    }
}

impl ToBytes for () {
    fn encode<W: ByteWriter>(&self, _: &mut W) -> Result<(), ToBytesError> {
        Ok(())
    }
}
impl FromBytes<'_> for () {
    fn decode(_: &mut untrusted::Reader<'_>) -> Result<Self, FromBytesError> {
        Ok(())
    }
}

impl<const N: usize> ToBytes for [u8 ; N] {
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
        buf.put_slice(self);
        Ok(())
    }

    fn size_hint(&self) -> usize {
        N
    }
}
impl<const N: usize> FromBytes<'_> for [u8 ; N] {
    fn decode(reader: &mut untrusted::Reader<'_>) -> Result<Self, FromBytesError> {
        let bytes = reader.read_bytes(N)?;
        let mut buf = [0u8 ; N];
        buf.copy_from_slice(bytes.as_slice_less_safe());
        Ok(buf)
    }
}

/// Format: length prefix followed by the raw bytes
impl ToBytes for [u8] {
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
        encode_len(self.len(), buf)?;
        buf.put_slice(self);
        Ok(())
    }

    fn size_hint(&self) -> usize {
        std::mem::size_of::<LenType>() + self.len()
    }
}
impl<'a> FromBytes<'a> for &'a [u8] {
    fn decode(reader: &mut untrusted::Reader<'a>) -> Result<Self, FromBytesError> {
        let len = decode_len(reader)?;
        Ok(reader.read_bytes(len)?.as_slice_less_safe())
    }
}

impl<T: ToBytes + ?Sized> ToBytes for &T {
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
        (**self).encode(buf)
    }

    fn size_hint(&self) -> usize {
        (**self).size_hint()
    }
}

/// Format: same as `[u8]`, body is UTF-8
impl ToBytes for str {
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
        self.as_bytes().encode(buf)
    }

    fn size_hint(&self) -> usize {
        self.as_bytes().size_hint()
    }
}
impl<'a> FromBytes<'a> for &'a str {
    fn decode(reader: &mut untrusted::Reader<'a>) -> Result<Self, FromBytesError> {
        let bytes = <&'a [u8]>::decode(reader)?;
        std::str::from_utf8(bytes)
            .map_err(|e| FromBytesError::Parsing(format!("Invalid UTF-8 string: {}", e)))
    }
}

impl ToBytes for String {
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
        self.as_str().encode(buf)
    }

    fn size_hint(&self) -> usize {
        self.as_str().size_hint()
    }
}
impl FromBytes<'_> for String {
    fn decode(reader: &mut untrusted::Reader<'_>) -> Result<Self, FromBytesError> {
        <&str>::decode(reader).map(ToOwned::to_owned)
    }
}

/// Format: element count followed by each encoded element
impl<T: ToBytes> ToBytes for Vec<T> {
    fn encode<W: ByteWriter>(&self, buf: &mut W) -> Result<(), ToBytesError> {
        encode_len(self.len(), buf)?;
        for elem in self.iter() {
            elem.encode(buf)?;
        }

        Ok(())
    }

    fn size_hint(&self) -> usize {
        self.iter().fold(std::mem::size_of::<LenType>(), |acc, elem| acc + elem.size_hint())
    }
}
impl<'a, T: FromBytes<'a>> FromBytes<'a> for Vec<T> {
    fn decode(reader: &mut untrusted::Reader<'a>) -> Result<Self, FromBytesError> {
        let len = decode_len(reader)?;
        (0..len)
            .map(|_| T::decode(reader))
            .collect()
    }
}
