//! Shelf
//!
//! Dictionary-style access to a store: single keys, tagged values, an optional
//! default factory for misses and prefix scans.
//!
//! Keys are stored as given (no namespace). When the config names a lock file,
//! read-modify-write operations (`get_item` on a miss, `update`) run under
//! it; plain `get`/`set`/`delete` and `scan` never take the lock.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::codec::{Key, Value, ValueCodec};
use crate::config::StoreConfig;
use crate::error::{AtlasError, Result};
use crate::lock::FileLock;
use crate::store::{ScanIter, Store};

/// Produces the value stored for a missing key
pub type DefaultFactory = Box<dyn Fn() -> Value + Send + Sync>;

pub struct Shelf {
    store: Store,
    codec: ValueCodec,
    lock: Option<FileLock>,
    default_factory: Option<DefaultFactory>,
}

impl Shelf {
    /// Open the store described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store = Store::from_config(config)?;
        Ok(Self {
            store,
            codec: ValueCodec::new(config.auto_serialize, config.object_format),
            lock: config.lock_path.as_ref().map(FileLock::new),
            default_factory: None,
        })
    }

    /// In-memory shelf with default settings
    pub fn in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory()?)
    }

    /// Builder-style default factory
    pub fn with_default_factory(mut self, factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default_factory = Some(Box::new(factory));
        self
    }

    /// Set or clear the default factory
    pub fn set_default_factory(&mut self, factory: Option<DefaultFactory>) {
        self.default_factory = factory;
    }

    pub fn has_default_factory(&self) -> bool {
        self.default_factory.is_some()
    }

    // =========================================================================
    // Subscript Access
    // =========================================================================

    /// Value for `key`; on a miss, the default factory's value is stored and
    /// returned, otherwise `KeyMissing`
    pub fn get_item(&self, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        let raw_key = key.encoded()?;

        if let Some(value) = self.get_encoded(raw_key)? {
            return Ok(value);
        }
        if self.default_factory.is_none() {
            return Err(AtlasError::KeyMissing(key.to_string()));
        }

        self.locked(|| self.get_or_create(&key))
    }

    /// Value for `key`, `None` on a miss (the default factory is not used)
    pub fn get(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        self.get_encoded(key.encoded()?)
    }

    /// Value for `key`, or `default` on a miss
    pub fn get_or(&self, key: impl Into<Key>, default: impl Into<Value>) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let data = self.codec.encode(&value.into())?;
        self.store.set(key.encoded()?, &data)
    }

    /// Remove `key`; `KeyMissing` if it was absent
    pub fn remove(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        if self.store.delete(key.encoded()?)? {
            Ok(())
        } else {
            Err(AtlasError::KeyMissing(key.to_string()))
        }
    }

    /// Remove `key`; false if it was absent
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        self.store.delete(key.encoded()?)
    }

    pub fn contains(&self, key: impl Into<Key>) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Read-modify-write of one key under the shelf's lock
    ///
    /// A miss goes through the default factory (or fails with `KeyMissing`).
    pub fn update<F>(&self, key: impl Into<Key>, f: F) -> Result<Value>
    where
        F: FnOnce(Value) -> Result<Value>,
    {
        let key = key.into();
        self.locked(|| {
            let current = self.get_or_create(&key)?;
            let updated = f(current)?;
            self.set(key.clone(), updated.clone())?;
            Ok(updated)
        })
    }

    // =========================================================================
    // Typed Objects
    // =========================================================================

    /// Store a serializable object (requires auto_serialize)
    pub fn set_object<T: Serialize + ?Sized>(&self, key: impl Into<Key>, object: &T) -> Result<()> {
        let value = self.codec.to_value(object)?;
        self.set(key, value)
    }

    /// Load a serialized object; `TypeMismatch` if the value is not one
    pub fn get_object<T: DeserializeOwned>(&self, key: impl Into<Key>) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => self.codec.from_value(value).map(Some),
            None => Ok(None),
        }
    }

    /// Key for an arbitrary serializable value
    pub fn object_key<T: Serialize + ?Sized>(&self, key: &T) -> Result<Key> {
        self.codec.object_key(key)
    }

    // =========================================================================
    // Enumeration / Lifecycle
    // =========================================================================

    /// Entries whose key starts with `prefix`, in engine order
    ///
    /// Each call starts a fresh enumeration. The lock is not held, so
    /// concurrent writers may or may not be observed.
    pub fn scan(&self, prefix: impl AsRef<[u8]>) -> Result<ShelfScan> {
        let inner = self.store.scan(prefix.as_ref())?;
        Ok(ShelfScan {
            inner,
            codec: self.codec,
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Close the underlying store; later calls fail with `NotOpen`
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    pub fn is_open(&self) -> bool {
        self.store.is_open()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn get_encoded(&self, raw_key: &[u8]) -> Result<Option<Value>> {
        Ok(self.store.get(raw_key)?.map(|data| self.codec.decode(&data)))
    }

    /// Re-check, then synthesize and store the default (caller holds the lock)
    fn get_or_create(&self, key: &Key) -> Result<Value> {
        let raw_key = key.encoded()?;
        if let Some(value) = self.get_encoded(raw_key)? {
            return Ok(value);
        }
        let Some(factory) = &self.default_factory else {
            return Err(AtlasError::KeyMissing(key.to_string()));
        };

        let value = factory();
        self.store.set(raw_key, &self.codec.encode(&value)?)?;
        debug!(key = %key, kind = value.kind(), "stored default value");
        Ok(value)
    }

    fn locked<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        match &self.lock {
            Some(lock) => lock.with_lock(f),
            None => f(),
        }
    }
}

impl fmt::Debug for Shelf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shelf")
            .field("store", &self.store)
            .field("codec", &self.codec)
            .field("lock", &self.lock.as_ref().map(|l| l.path()))
            .field("default_factory", &self.default_factory.is_some())
            .finish()
    }
}

/// Decoding iterator returned by `Shelf::scan`
#[derive(Debug, Clone)]
pub struct ShelfScan {
    inner: ScanIter,
    codec: ValueCodec,
}

impl Iterator for ShelfScan {
    type Item = Result<(Vec<u8>, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(entry.map(|(key, data)| (key, self.codec.decode(&data))))
    }
}
