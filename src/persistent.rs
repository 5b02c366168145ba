//! Persistent Objects
//!
//! The atomic load → mutate → save protocol for typed records.
//!
//! ## Update Cycle
//! ```text
//! acquire file lock
//!   └─ open store (on-disk) / reuse shared store (in-memory)
//!        get record ── missing ──> default factory, or KeyMissing
//!            │
//!            └─ present ──> from_record
//!        mutator(&mut current) -> Replace(new) | KeepMutated
//!        to_record ─> encode ─> set
//!   └─ close store
//! release file lock
//! ```
//!
//! Every actor that goes through a `Collection` configured with the same lock
//! file is serialized, so a read-modify-write cycle never interleaves with
//! another. Nothing is written unless the whole cycle succeeds.

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{Key, ValueCodec};
use crate::config::StoreConfig;
use crate::error::{AtlasError, Result};
use crate::lock::FileLock;
use crate::store::Store;

/// A type whose instances are stored as records under a key
///
/// There is no reflection to fall back on, so each type spells out how it
/// becomes a record and how it is rebuilt from one. `Record` is often `Self`
/// minus the key, or a small serde struct.
pub trait Persistent: Sized {
    /// Identifying key of an instance
    type Key: Serialize + Clone + PartialEq + fmt::Debug;

    /// Storable representation
    type Record: Serialize + DeserializeOwned;

    /// Default namespace: the unqualified type name
    fn type_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    fn key(&self) -> &Self::Key;

    /// Re-key an instance produced by a default factory
    fn set_key(&mut self, key: Self::Key);

    fn to_record(&self) -> Self::Record;

    fn from_record(key: Self::Key, record: Self::Record) -> Result<Self>;
}

/// What a mutator did with the current value
#[derive(Debug)]
pub enum Mutation<T> {
    /// Store this value instead of the current one
    Replace(T),

    /// Store the current value as mutated in place
    KeepMutated,
}

/// Boxed default factory for `Collection::try_update`
pub type DefaultFactory<'a, T> = Box<dyn FnOnce() -> T + 'a>;

/// Storage for one persistent type
pub struct Collection<T: Persistent> {
    config: StoreConfig,
    codec: ValueCodec,
    namespace: String,
    lock: FileLock,

    /// In-memory engines cannot be reopened, so they stay open for the
    /// collection's lifetime
    shared: Option<Store>,

    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistent> Collection<T> {
    /// Bind `T` to the store described by `config`
    pub fn open(config: StoreConfig) -> Result<Self> {
        let type_name = T::type_name();
        let namespace = config.namespace_for(type_name).to_string();
        let lock = FileLock::new(config.resolve_lock_path(type_name));
        let codec = ValueCodec::new(config.auto_serialize, config.object_format);

        let shared = if config.in_memory {
            Some(Store::from_config(&config)?)
        } else {
            None
        };

        debug!(
            namespace = %namespace,
            lock = %lock.path().display(),
            in_memory = config.in_memory,
            "collection opened"
        );

        Ok(Self {
            config,
            codec,
            namespace,
            lock,
            shared,
            _marker: PhantomData,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // =========================================================================
    // Atomic Update
    // =========================================================================

    /// Atomically mutate an existing record; `KeyMissing` if absent
    pub fn update<M>(&self, key: &T::Key, mutator: M) -> Result<T>
    where
        M: FnOnce(&mut T) -> Mutation<T>,
    {
        self.try_update(key, None, |current| Ok(mutator(current)))
    }

    /// Atomically mutate a record, creating it from `default_factory` if absent
    pub fn update_or_default<F, M>(&self, key: &T::Key, default_factory: F, mutator: M) -> Result<T>
    where
        F: FnOnce() -> T,
        M: FnOnce(&mut T) -> Mutation<T>,
    {
        self.try_update(key, Some(Box::new(default_factory)), |current| Ok(mutator(current)))
    }

    /// General form: optional factory and a fallible mutator
    ///
    /// A mutator error aborts the cycle; the stored record is left untouched.
    pub fn try_update<M>(
        &self,
        key: &T::Key,
        default_factory: Option<DefaultFactory<'_, T>>,
        mutator: M,
    ) -> Result<T>
    where
        M: FnOnce(&mut T) -> Result<Mutation<T>>,
    {
        let full_key = self.full_key(key)?;

        self.with_store(|store| {
            let mut current = match self.read_record(store, key, &full_key)? {
                Some(existing) => existing,
                None => {
                    let Some(factory) = default_factory else {
                        return Err(self.missing(key));
                    };
                    let mut fresh = factory();
                    fresh.set_key(key.clone());
                    fresh
                }
            };

            let current = match mutator(&mut current)? {
                Mutation::Replace(replacement) => replacement,
                Mutation::KeepMutated => current,
            };
            if current.key() != key {
                return Err(AtlasError::TypeMismatch(format!(
                    "mutator produced a record for key {:?}, expected {:?}",
                    current.key(),
                    key
                )));
            }

            self.write_record(store, &full_key, &current)?;
            Ok(current)
        })
    }

    // =========================================================================
    // Derived Operations
    // =========================================================================

    /// Load a record; `KeyMissing` if absent
    pub fn load(&self, key: &T::Key) -> Result<T> {
        self.get(key)?.ok_or_else(|| self.missing(key))
    }

    /// Load a record, falling back to `default` if absent
    pub fn load_or(&self, key: &T::Key, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Load a record under the lock, `None` if absent
    pub fn get(&self, key: &T::Key) -> Result<Option<T>> {
        let full_key = self.full_key(key)?;
        self.with_store(|store| self.read_record(store, key, &full_key))
    }

    /// Write `instance` under its key, replacing whatever is stored
    pub fn save(&self, instance: &T) -> Result<()> {
        let full_key = self.full_key(instance.key())?;
        self.with_store(|store| self.write_record(store, &full_key, instance))
    }

    /// Remove a record; false if it did not exist
    pub fn delete(&self, key: &T::Key) -> Result<bool> {
        let full_key = self.full_key(key)?;
        self.with_store(|store| store.delete(full_key.encoded()?))
    }

    pub fn exists(&self, key: &T::Key) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn full_key(&self, key: &T::Key) -> Result<Key> {
        Key::namespaced(&self.namespace, key)
    }

    fn missing(&self, key: &T::Key) -> AtlasError {
        AtlasError::KeyMissing(format!("{}/{:?}", self.namespace, key))
    }

    fn read_record(&self, store: &Store, key: &T::Key, full_key: &Key) -> Result<Option<T>> {
        let Some(data) = store.get(full_key.encoded()?)? else {
            return Ok(None);
        };
        let record: T::Record = self.codec.from_value(self.codec.decode(&data))?;
        T::from_record(key.clone(), record).map(Some)
    }

    fn write_record(&self, store: &Store, full_key: &Key, instance: &T) -> Result<()> {
        let value = self.codec.to_value(&instance.to_record())?;
        let data = self.codec.encode(&value)?;
        store.set(full_key.encoded()?, &data)
    }

    /// Run `f` against the store while holding the file lock
    ///
    /// On-disk stores are opened inside the lock and closed before it is
    /// released, so the next holder can open the directory.
    fn with_store<R>(&self, f: impl FnOnce(&Store) -> Result<R>) -> Result<R> {
        let guard = self.lock.acquire()?;

        let result = match &self.shared {
            Some(store) => f(store),
            None => {
                let store = Store::from_config(&self.config)?;
                let result = f(&store);
                match (store.close(), result) {
                    (Ok(()), result) => result,
                    (Err(close_err), Ok(_)) => Err(close_err),
                    (Err(close_err), Err(e)) => {
                        warn!(error = %close_err, "error closing store after failed operation");
                        Err(e)
                    }
                }
            }
        };

        drop(guard);
        result
    }
}

impl<T: Persistent> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace)
            .field("lock", &self.lock.path())
            .field("in_memory", &self.config.in_memory)
            .finish()
    }
}
