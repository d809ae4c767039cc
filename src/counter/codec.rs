//! Identifier codecs
//!
//! A counter identifier travels through the queue as the payload bytes of a
//! delta message. A codec maps one identifier representation to those bytes
//! and back. Within one representation the mapping must be injective, and
//! decode(encode(id)) must equal id.

use crate::error::{CounterError, Result};
use crate::store::{Key, KeyEncoder};
use bytes::Bytes;
use std::fmt::Debug;
use std::hash::Hash;

/// Byte encoding for one identifier representation
pub trait IdentifierCodec: Send + Sync {
    type Id: Eq + Hash + Clone + Debug + Send;

    fn encode(&self, id: &Self::Id) -> Result<Bytes>;

    fn decode(&self, raw: &[u8]) -> Result<Self::Id>;
}

/// Payload bytes as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl IdentifierCodec for RawCodec {
    type Id = Bytes;

    fn encode(&self, id: &Bytes) -> Result<Bytes> {
        Ok(id.clone())
    }

    fn decode(&self, raw: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(raw))
    }
}

/// UTF-8 strings
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl IdentifierCodec for StringCodec {
    type Id = String;

    fn encode(&self, id: &String) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(id.as_bytes()))
    }

    fn decode(&self, raw: &[u8]) -> Result<String> {
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| CounterError::decoding(raw, format!("not UTF-8: {}", e)))
    }
}

/// 32-bit integers as decimal ASCII
#[derive(Debug, Clone, Copy, Default)]
pub struct Int32Codec;

impl IdentifierCodec for Int32Codec {
    type Id = i32;

    fn encode(&self, id: &i32) -> Result<Bytes> {
        Ok(Bytes::from(id.to_string()))
    }

    fn decode(&self, raw: &[u8]) -> Result<i32> {
        parse_decimal(raw)
    }
}

/// 64-bit integers as decimal ASCII
#[derive(Debug, Clone, Copy, Default)]
pub struct Int64Codec;

impl IdentifierCodec for Int64Codec {
    type Id = i64;

    fn encode(&self, id: &i64) -> Result<Bytes> {
        Ok(Bytes::from(id.to_string()))
    }

    fn decode(&self, raw: &[u8]) -> Result<i64> {
        parse_decimal(raw)
    }
}

fn parse_decimal<T>(raw: &[u8]) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let text = std::str::from_utf8(raw)
        .map_err(|e| CounterError::decoding(raw, format!("not UTF-8: {}", e)))?;
    text.parse::<T>()
        .map_err(|e| CounterError::decoding(raw, e.to_string()))
}

/// Structured store keys via `KeyEncoder`
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyCodec;

impl IdentifierCodec for KeyCodec {
    type Id = Key;

    fn encode(&self, id: &Key) -> Result<Bytes> {
        KeyEncoder::encode(id).map(Bytes::from)
    }

    fn decode(&self, raw: &[u8]) -> Result<Key> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| CounterError::decoding(raw, format!("not UTF-8: {}", e)))?;
        KeyEncoder::decode(text)
    }
}
