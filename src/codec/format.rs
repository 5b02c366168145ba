//! Object serialization strategies
//!
//! Generic serialization for application values that are neither bytes nor
//! text. The format is chosen per store and recorded nowhere in the envelope,
//! so every process sharing a store must agree on it.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serialization strategy for SERIALIZED payloads and non-text keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectFormat {
    /// Compact binary encoding (not self-describing)
    #[default]
    Bincode,

    /// Self-describing JSON; required for schemaless records such as
    /// `serde_json::Value`
    Json,
}

impl ObjectFormat {
    /// Serialize a value into payload bytes
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            ObjectFormat::Bincode => Ok(bincode::serialize(value)?),
            ObjectFormat::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Deserialize payload bytes into a value
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            ObjectFormat::Bincode => Ok(bincode::deserialize(bytes)?),
            ObjectFormat::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ObjectFormat::Bincode => "bincode",
            ObjectFormat::Json => "json",
        }
    }
}
