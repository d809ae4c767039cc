//! Structured store keys and their canonical text encoding
//!
//! Encoded form: URL-safe base64 (no padding) of
//! `bincode(EncodedKey) ++ crc32(bincode(EncodedKey)) as 4 little-endian bytes`,
//! where `EncodedKey` is the app, the namespace and the flat root-to-leaf
//! path of `(kind, id)` pairs.
//!
//! The encoding is deterministic and injective over complete keys, and
//! decoding verifies the checksum, so a truncated or hand-edited payload is
//! rejected rather than silently decoded into a different key.
//!
//! Keys are at most `MAX_KEY_DEPTH` levels deep and encode to at most
//! `MAX_ENCODED_LEN` characters. Both bounds are checked on encode and
//! before any parsing on decode.

use crate::error::{CounterError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

const CRC_LEN: usize = 4;

/// Deepest ancestry chain a key may have, counting the key itself
pub const MAX_KEY_DEPTH: usize = 100;

/// Longest canonical text form `KeyEncoder` produces or accepts
pub const MAX_ENCODED_LEN: usize = 64 * 1024;

/// Identifier part of a key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    Name(String),
    Int(i64),
    /// Not yet allocated; cannot be encoded
    Incomplete,
}

/// Hierarchical store key: kind + id, optionally under a parent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    app: String,
    namespace: String,
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
}

impl Key {
    pub fn new(kind: impl Into<String>, id: KeyId) -> Self {
        Key {
            app: String::new(),
            namespace: String::new(),
            kind: kind.into(),
            id,
            parent: None,
        }
    }

    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, KeyId::Name(name.into()))
    }

    pub fn numbered(kind: impl Into<String>, id: i64) -> Self {
        Self::new(kind, KeyId::Int(id))
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self::new(kind, KeyId::Incomplete)
    }

    /// Place this key under `parent`, inheriting its app and namespace
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.app = parent.app.clone();
        self.namespace = parent.namespace.clone();
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// This key, then its parent, up to the root
    pub fn ancestry(&self) -> impl Iterator<Item = &Key> {
        std::iter::successors(Some(self), |key| key.parent())
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self.id, KeyId::Incomplete)
    }

    /// Check the invariants the encoding relies on, walking up the ancestry
    fn validate(&self) -> std::result::Result<(), String> {
        if self.ancestry().nth(MAX_KEY_DEPTH).is_some() {
            return Err(format!(
                "key of kind {} is deeper than {} levels",
                self.kind, MAX_KEY_DEPTH
            ));
        }
        for key in self.ancestry() {
            if key.kind.is_empty() {
                return Err("key kind is empty".to_string());
            }
            match &key.id {
                KeyId::Incomplete => return Err(format!("key {} is incomplete", self)),
                KeyId::Name(name) if name.is_empty() => {
                    return Err(format!("key of kind {} has an empty name", key.kind))
                }
                KeyId::Int(0) => return Err(format!("key of kind {} has id 0", key.kind)),
                _ => {}
            }
            if key.namespace != self.namespace || key.app != self.app {
                return Err(format!(
                    "key {} does not share app/namespace with its ancestors",
                    self
                ));
            }
        }
        Ok(())
    }
}

// Unlink the chain one level at a time so a long ancestry does not recurse
impl Drop for Key {
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(mut key) = next {
            next = key.parent.take();
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut path: Vec<&Key> = self.ancestry().collect();
        path.reverse();
        for key in path {
            match &key.id {
                KeyId::Name(name) => write!(f, "/{},{:?}", key.kind, name)?,
                KeyId::Int(id) => write!(f, "/{},{}", key.kind, id)?,
                KeyId::Incomplete => write!(f, "/{},?", key.kind)?,
            }
        }
        Ok(())
    }
}

/// One level of an encoded key
#[derive(Serialize, Deserialize)]
struct PathElement {
    kind: String,
    id: KeyId,
}

/// Wire form of a key: no nesting, so decoding never recurses
#[derive(Serialize, Deserialize)]
struct EncodedKey {
    app: String,
    namespace: String,
    path: Vec<PathElement>,
}

impl EncodedKey {
    fn from_key(key: &Key) -> Self {
        let mut path: Vec<PathElement> = key
            .ancestry()
            .map(|k| PathElement {
                kind: k.kind.clone(),
                id: k.id.clone(),
            })
            .collect();
        path.reverse();
        EncodedKey {
            app: key.app.clone(),
            namespace: key.namespace.clone(),
            path,
        }
    }

    /// Rebuild the chain from the root down
    fn into_key(self) -> Option<Key> {
        let mut key: Option<Key> = None;
        for element in self.path {
            let mut child = Key::new(element.kind, element.id)
                .with_namespace(self.namespace.clone())
                .with_app(self.app.clone());
            child.parent = key.map(Box::new);
            key = Some(child);
        }
        key
    }
}

/// Encodes and decodes store keys to and from their canonical text form
pub struct KeyEncoder;

impl KeyEncoder {
    /// Canonical text form of a complete key
    pub fn encode(key: &Key) -> Result<String> {
        key.validate().map_err(CounterError::Encoding)?;

        let mut bytes = bincode::serialize(&EncodedKey::from_key(key))
            .map_err(|e| CounterError::Encoding(e.to_string()))?;
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());

        let encoded = URL_SAFE_NO_PAD.encode(bytes);
        if encoded.len() > MAX_ENCODED_LEN {
            return Err(CounterError::Encoding(format!(
                "encoded key is {} characters, limit is {}",
                encoded.len(),
                MAX_ENCODED_LEN
            )));
        }
        Ok(encoded)
    }

    /// Inverse of `encode`
    pub fn decode(encoded: &str) -> Result<Key> {
        let raw = encoded.as_bytes();
        if raw.len() > MAX_ENCODED_LEN {
            return Err(CounterError::decoding(
                &raw[..64],
                format!(
                    "encoded key is {} characters, limit is {}",
                    raw.len(),
                    MAX_ENCODED_LEN
                ),
            ));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CounterError::decoding(raw, format!("invalid base64: {}", e)))?;

        if bytes.len() <= CRC_LEN {
            return Err(CounterError::decoding(raw, "encoded key too short"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - CRC_LEN);
        let mut crc_bytes = [0u8; CRC_LEN];
        crc_bytes.copy_from_slice(trailer);
        if crc32fast::hash(body) != u32::from_le_bytes(crc_bytes) {
            return Err(CounterError::decoding(raw, "checksum mismatch"));
        }

        let flat: EncodedKey = bincode::deserialize(body)
            .map_err(|e| CounterError::decoding(raw, format!("invalid key body: {}", e)))?;
        if flat.path.len() > MAX_KEY_DEPTH {
            return Err(CounterError::decoding(
                raw,
                format!("key path has {} levels, limit is {}", flat.path.len(), MAX_KEY_DEPTH),
            ));
        }
        let key = flat
            .into_key()
            .ok_or_else(|| CounterError::decoding(raw, "key path is empty"))?;
        key.validate()
            .map_err(|reason| CounterError::decoding(raw, reason))?;
        Ok(key)
    }
}
