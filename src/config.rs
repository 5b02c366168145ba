//! Configuration for atlasdict
//!
//! Centralized store configuration with a validating builder.

use std::env;
use std::path::{Path, PathBuf};

use crate::codec::ObjectFormat;
use crate::error::{AtlasError, Result};

/// Environment variable naming the on-disk store directory
pub const ENV_PATH: &str = "ATLASDICT_PATH";
/// Environment variable selecting an in-memory store ("1"/"true")
pub const ENV_IN_MEMORY: &str = "ATLASDICT_IN_MEMORY";
/// Environment variable overriding the native library path
pub const ENV_LIBRARY: &str = "ATLASDICT_LIBRARY";
/// Environment variable overriding the lock file path
pub const ENV_LOCK_PATH: &str = "ATLASDICT_LOCK_PATH";
/// Environment variable overriding the record namespace
pub const ENV_NAMESPACE: &str = "ATLASDICT_NAMESPACE";

/// Default lock file inside an on-disk store directory
pub const STORE_LOCK_FILENAME: &str = ".atlasdict.lock";

/// Configuration for one store (and the collections built on top of it)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Storage Location
    // -------------------------------------------------------------------------
    /// Engine directory; `None` exactly when `in_memory` is set
    pub path: Option<PathBuf>,

    /// Use a process-local in-memory engine instance
    pub in_memory: bool,

    /// Shared library exporting the engine ABI; `None` uses the bundled engine
    pub library_path: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Value Encoding
    // -------------------------------------------------------------------------
    /// When false, only bytes and text may be stored
    pub auto_serialize: bool,

    /// Serialization used for SERIALIZED payloads and non-text keys
    pub object_format: ObjectFormat,

    // -------------------------------------------------------------------------
    // Coordination
    // -------------------------------------------------------------------------
    /// Explicit advisory lock file
    pub lock_path: Option<PathBuf>,

    /// Record namespace for the persistence layer (defaults to the type name)
    pub namespace: Option<String>,
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// On-disk store rooted at `path` with default settings
    pub fn on_disk(path: impl Into<PathBuf>) -> Result<Self> {
        Self::builder().path(path).build()
    }

    /// In-memory store with default settings
    pub fn in_memory() -> Result<Self> {
        Self::builder().in_memory(true).build()
    }

    /// Build a config from `ATLASDICT_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(path) = env::var_os(ENV_PATH) {
            builder = builder.path(path);
        }
        if let Ok(flag) = env::var(ENV_IN_MEMORY) {
            builder = builder.in_memory(matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ));
        }
        if let Some(lib) = env::var_os(ENV_LIBRARY) {
            builder = builder.library_path(lib);
        }
        if let Some(lock) = env::var_os(ENV_LOCK_PATH) {
            builder = builder.lock_path(lock);
        }
        if let Ok(namespace) = env::var(ENV_NAMESPACE) {
            builder = builder.namespace(namespace);
        }

        builder.build()
    }

    /// Namespace for records of `type_name`
    pub fn namespace_for<'a>(&'a self, type_name: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => type_name,
        }
    }

    /// Lock file guarding records of `type_name`
    ///
    /// Resolution order:
    /// 1. explicit `lock_path`
    /// 2. `<path>/.atlasdict.lock` for on-disk stores; one file for every
    ///    type, since each operation opens the whole engine directory
    /// 3. `<temp_dir>/atlasdict-<type_name>.lock` for in-memory stores
    pub fn resolve_lock_path(&self, type_name: &str) -> PathBuf {
        if let Some(lock) = &self.lock_path {
            return lock.clone();
        }
        match (&self.path, self.in_memory) {
            (Some(path), false) => path.join(STORE_LOCK_FILENAME),
            _ => env::temp_dir().join(format!("atlasdict-{}.lock", type_name)),
        }
    }

    /// Storage directory, if this is an on-disk store
    pub fn storage_path(&self) -> Option<&Path> {
        if self.in_memory {
            None
        } else {
            self.path.as_deref()
        }
    }
}

/// Builder for StoreConfig
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self {
            config: StoreConfig {
                path: None,
                in_memory: false,
                library_path: None,
                auto_serialize: true,
                object_format: ObjectFormat::default(),
                lock_path: None,
                namespace: None,
            },
        }
    }
}

impl StoreConfigBuilder {
    /// Set the engine directory
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    /// Use an in-memory engine instead of a directory
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.config.in_memory = in_memory;
        self
    }

    /// Load the engine from a shared library instead of the bundled one
    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.library_path = Some(path.into());
        self
    }

    /// Allow (or forbid) generic serialization of non-text values
    pub fn auto_serialize(mut self, enabled: bool) -> Self {
        self.config.auto_serialize = enabled;
        self
    }

    /// Set the object serialization format
    pub fn object_format(mut self, format: ObjectFormat) -> Self {
        self.config.object_format = format;
        self
    }

    /// Set an explicit advisory lock file
    pub fn lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.lock_path = Some(path.into());
        self
    }

    /// Set the record namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = Some(namespace.into());
        self
    }

    /// Validate and build the config
    ///
    /// Exactly one of `path` / `in_memory` must be given.
    pub fn build(mut self) -> Result<StoreConfig> {
        match (&self.config.path, self.config.in_memory) {
            (Some(_), true) => {
                return Err(AtlasError::Config(
                    "a storage path and in_memory are mutually exclusive".to_string(),
                ))
            }
            (None, false) => {
                return Err(AtlasError::Config(
                    "storage is not configured: a path is required unless in_memory is set"
                        .to_string(),
                ))
            }
            (Some(path), false) if path.as_os_str().is_empty() => {
                return Err(AtlasError::Config("storage path is empty".to_string()))
            }
            _ => {}
        }

        if let Some(path) = self.config.path.take() {
            self.config.path = Some(absolutize(path)?);
        }
        if let Some(lock) = self.config.lock_path.take() {
            self.config.lock_path = Some(absolutize(lock)?);
        }

        Ok(self.config)
    }
}

/// Relative paths are resolved against the working directory at build time
fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}
