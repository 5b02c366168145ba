//! Value envelope
//!
//! One tag byte followed by the payload.

/// Payload is stored bytes, unchanged
pub const TAG_RAW: u8 = 0x00;

/// Payload is UTF-8 text
pub const TAG_TEXT: u8 = 0x01;

/// Payload is an object serialized with the store's `ObjectFormat`
pub const TAG_SERIALIZED: u8 = 0x02;

/// A decoded stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw bytes (tag RAW)
    Raw(Vec<u8>),

    /// UTF-8 text (tag TEXT)
    Text(String),

    /// Serialized object payload (tag SERIALIZED)
    Serialized(Vec<u8>),
}

impl Value {
    /// The envelope tag this value is stored under
    pub fn tag(&self) -> u8 {
        match self {
            Value::Raw(_) => TAG_RAW,
            Value::Text(_) => TAG_TEXT,
            Value::Serialized(_) => TAG_SERIALIZED,
        }
    }

    /// Payload bytes, without the tag
    pub fn payload(&self) -> &[u8] {
        match self {
            Value::Raw(bytes) | Value::Serialized(bytes) => bytes,
            Value::Text(text) => text.as_bytes(),
        }
    }

    /// Encode into a tagged envelope
    pub fn to_envelope(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut envelope = Vec::with_capacity(1 + payload.len());
        envelope.push(self.tag());
        envelope.extend_from_slice(payload);
        envelope
    }

    /// Decode a tagged envelope
    ///
    /// - empty data decodes to empty raw bytes ("found but empty")
    /// - an unknown tag returns the whole envelope as raw bytes
    /// - a TEXT payload that is not valid UTF-8 is treated like an unknown tag
    pub fn from_envelope(data: &[u8]) -> Self {
        let Some((&tag, payload)) = data.split_first() else {
            return Value::Raw(Vec::new());
        };

        match tag {
            TAG_RAW => Value::Raw(payload.to_vec()),
            TAG_TEXT => match std::str::from_utf8(payload) {
                Ok(text) => Value::Text(text.to_string()),
                Err(_) => Value::Raw(data.to_vec()),
            },
            TAG_SERIALIZED => Value::Serialized(payload.to_vec()),
            _ => Value::Raw(data.to_vec()),
        }
    }

    /// Borrow raw bytes, if this is a RAW value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Borrow text, if this is a TEXT value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Short kind name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Raw(_) => "raw",
            Value::Text(_) => "text",
            Value::Serialized(_) => "serialized",
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Raw(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Raw(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(bytes: &[u8; N]) -> Self {
        Value::Raw(bytes.to_vec())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}
