//! Key encoding
//!
//! Keys are opaque, non-empty byte strings. Bytes pass through, text is UTF-8
//! encoded and anything else goes through an `ObjectFormat`.

use std::fmt;

use serde::Serialize;

use crate::error::{AtlasError, Result};

use super::ObjectFormat;

/// An encoded store key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<u8>);

impl Key {
    /// Key from raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Key from an arbitrary serializable value
    pub fn serialized<T: Serialize + ?Sized>(value: &T, format: ObjectFormat) -> Result<Self> {
        Ok(Key(format.serialize(value)?))
    }

    /// Key for a record in a namespace
    ///
    /// The `(namespace, key)` pair is bincode encoded so the same pair always
    /// yields the same bytes, whatever object format the store uses.
    pub fn namespaced<K: Serialize + ?Sized>(namespace: &str, key: &K) -> Result<Self> {
        Ok(Key(bincode::serialize(&(namespace, key))?))
    }

    /// Encoded bytes; empty keys are rejected
    pub fn encoded(&self) -> Result<&[u8]> {
        if self.0.is_empty() {
            return Err(AtlasError::Encoding("empty keys are not supported".to_string()));
        }
        Ok(&self.0)
    }

    /// Raw bytes, unchecked
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => write!(f, "{:?}", text),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Key(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Key {
    fn from(bytes: &[u8; N]) -> Self {
        Key(bytes.to_vec())
    }
}

impl From<String> for Key {
    fn from(text: String) -> Self {
        Key(text.into_bytes())
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Key(text.as_bytes().to_vec())
    }
}

impl From<&String> for Key {
    fn from(text: &String) -> Self {
        Key(text.as_bytes().to_vec())
    }
}
