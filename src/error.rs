//! Error types for atlasdict
//!
//! Provides a unified error type for all operations. Every failure reported by
//! the native engine is translated into one of these variants at the store
//! boundary; raw status codes never leave `store.rs`.

use thiserror::Error;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for atlasdict operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // Store Handle Errors
    // -------------------------------------------------------------------------
    #[error("store is closed")]
    NotOpen,

    /// Diagnostic text is the native engine's message, verbatim
    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("key not found: {0}")]
    KeyMissing(String),

    // -------------------------------------------------------------------------
    // Value Errors
    // -------------------------------------------------------------------------
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Locking / I/O Errors
    // -------------------------------------------------------------------------
    #[error("file locking is not supported on this platform")]
    LockUnsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AtlasError {
    /// True when the error means "the key is not there" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, AtlasError::KeyMissing(_))
    }
}

impl From<bincode::Error> for AtlasError {
    fn from(e: bincode::Error) -> Self {
        AtlasError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for AtlasError {
    fn from(e: serde_json::Error) -> Self {
        AtlasError::Serialization(e.to_string())
    }
}
