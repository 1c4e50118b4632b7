//! Value encodings for handshakes and message slots.
//!
//! The session never looks inside a payload; it hands the bytes delimited by
//! the frame to the slot's [`Encoding`]. A few stock encodings are provided
//! here. Anything else implements the trait directly.

use std::fmt;
use std::marker::PhantomData;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::EncodingError;

/// Encode/decode pair for one value type.
pub trait Encoding {
    /// The value carried by this encoding.
    type Value;

    /// Append the encoded form of `value` to `dst`.
    fn encode(&self, value: &Self::Value, dst: &mut BytesMut) -> Result<(), EncodingError>;

    /// Decode a value from exactly the bytes in `src`.
    fn decode(&self, src: Bytes) -> Result<Self::Value, EncodingError>;
}

/// Opaque bytes, passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Encoding for Raw {
    type Value = Bytes;

    fn encode(&self, value: &Bytes, dst: &mut BytesMut) -> Result<(), EncodingError> {
        dst.put_slice(value);
        Ok(())
    }

    fn decode(&self, src: Bytes) -> Result<Bytes, EncodingError> {
        Ok(src)
    }
}

/// UTF-8 text occupying the whole payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

impl Encoding for Utf8 {
    type Value = String;

    fn encode(&self, value: &String, dst: &mut BytesMut) -> Result<(), EncodingError> {
        dst.put_slice(value.as_bytes());
        Ok(())
    }

    fn decode(&self, src: Bytes) -> Result<String, EncodingError> {
        Ok(String::from_utf8(src.to_vec())?)
    }
}

/// Unsigned 32-bit integer, little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct U32;

impl Encoding for U32 {
    type Value = u32;

    fn encode(&self, value: &u32, dst: &mut BytesMut) -> Result<(), EncodingError> {
        dst.put_u32_le(*value);
        Ok(())
    }

    fn decode(&self, mut src: Bytes) -> Result<u32, EncodingError> {
        exact(&src, 4)?;
        Ok(src.get_u32_le())
    }
}

/// Signed 64-bit integer, little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64;

impl Encoding for I64 {
    type Value = i64;

    fn encode(&self, value: &i64, dst: &mut BytesMut) -> Result<(), EncodingError> {
        dst.put_i64_le(*value);
        Ok(())
    }

    fn decode(&self, mut src: Bytes) -> Result<i64, EncodingError> {
        exact(&src, 8)?;
        Ok(src.get_i64_le())
    }
}

/// Any serde type, as JSON.
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Json<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Json<T> {}

impl<T> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json<{}>", std::any::type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned> Encoding for Json<T> {
    type Value = T;

    fn encode(&self, value: &T, dst: &mut BytesMut) -> Result<(), EncodingError> {
        serde_json::to_writer(dst.writer(), value)?;
        Ok(())
    }

    fn decode(&self, src: Bytes) -> Result<T, EncodingError> {
        Ok(serde_json::from_slice(&src)?)
    }
}

fn exact(src: &Bytes, len: usize) -> Result<(), EncodingError> {
    if src.len() < len {
        return Err(EncodingError::Truncated {
            need: len,
            got: src.len(),
        });
    }
    if src.len() > len {
        return Err(EncodingError::TrailingBytes(src.len() - len));
    }
    Ok(())
}

/// Encode `value` into a standalone buffer.
pub(crate) fn encode_to_bytes<E: Encoding + ?Sized>(
    encoding: &E,
    value: &E::Value,
) -> Result<Bytes, EncodingError> {
    let mut buf = BytesMut::new();
    encoding.encode(value, &mut buf)?;
    Ok(buf.freeze())
}
