//! Value Codec Module
//!
//! Encodes application values into tagged envelopes stored in the engine.
//!
//! ## Envelope Format
//! ```text
//! ┌─────────┬──────────────────────────────────┐
//! │ Tag (1) │ Payload                          │
//! └─────────┴──────────────────────────────────┘
//!   0x00 RAW         bytes, unchanged
//!   0x01 TEXT        UTF-8
//!   0x02 SERIALIZED  ObjectFormat payload
//! ```
//!
//! Unknown tags decode to the whole envelope as raw bytes, and a zero-length
//! stored value decodes to empty raw bytes.

mod format;
mod key;
mod value;

pub use format::ObjectFormat;
pub use key::Key;
pub use value::{Value, TAG_RAW, TAG_SERIALIZED, TAG_TEXT};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AtlasError, Result};

/// Store-level codec: envelope handling plus the generic serialization policy
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    auto_serialize: bool,
    format: ObjectFormat,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(true, ObjectFormat::default())
    }
}

impl ValueCodec {
    pub fn new(auto_serialize: bool, format: ObjectFormat) -> Self {
        Self {
            auto_serialize,
            format,
        }
    }

    pub fn auto_serialize(&self) -> bool {
        self.auto_serialize
    }

    pub fn format(&self) -> ObjectFormat {
        self.format
    }

    /// Encode a value into its stored envelope
    ///
    /// SERIALIZED values are refused when generic serialization is disabled.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        if let Value::Serialized(_) = value {
            self.check_serialization_allowed()?;
        }
        Ok(value.to_envelope())
    }

    /// Decode a stored envelope
    pub fn decode(&self, data: &[u8]) -> Value {
        Value::from_envelope(data)
    }

    /// Wrap an arbitrary object as a SERIALIZED value
    pub fn to_value<T: Serialize + ?Sized>(&self, object: &T) -> Result<Value> {
        self.check_serialization_allowed()?;
        Ok(Value::Serialized(self.format.serialize(object)?))
    }

    /// Unwrap a SERIALIZED value into an object
    pub fn from_value<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        match value {
            Value::Serialized(payload) => self
                .format
                .deserialize(&payload)
                .map_err(|e| AtlasError::TypeMismatch(format!("cannot decode stored object: {}", e))),
            other => Err(AtlasError::TypeMismatch(format!(
                "expected a serialized object, found a {} value",
                other.kind()
            ))),
        }
    }

    /// Key for an arbitrary serializable value, using this codec's format
    pub fn object_key<T: Serialize + ?Sized>(&self, key: &T) -> Result<Key> {
        Key::serialized(key, self.format)
    }

    fn check_serialization_allowed(&self) -> Result<()> {
        if self.auto_serialize {
            Ok(())
        } else {
            Err(AtlasError::Encoding(
                "value is not bytes or text and auto_serialize is disabled".to_string(),
            ))
        }
    }
}
