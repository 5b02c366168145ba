//! # atlasdict
//!
//! Typed, process-safe access to an embedded key-value engine:
//! - A store handle over a native engine ABI (bundled or loaded at runtime)
//! - Tagged value envelopes for bytes, text and serialized objects
//! - A dictionary-style facade with default factories and prefix scans
//! - Atomic load → mutate → save for persistent records, serialized across
//!   processes by advisory file locks
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │          Shelf           │   │        Collection<T>         │
//! │  (dict-style, factory)   │   │  (Persistent, atomic update) │
//! └────────────┬─────────────┘   └───────┬───────────────┬──────┘
//!              │                         │               │
//!              │      ┌──────────────────┘               ▼
//!              ▼      ▼                          ┌──────────────┐
//!        ┌──────────────────┐  ┌─────────────┐   │   FileLock   │
//!        │      Store       │──│ ValueCodec  │   │   (flock)    │
//!        │ (handle, errors) │  │ (envelopes) │   └──────────────┘
//!        └────────┬─────────┘  └─────────────┘
//!                 │  NativeApi (C ABI)
//!        ┌────────┴─────────────────────┐
//!        ▼                              ▼
//! ┌─────────────────────┐     ┌──────────────────┐
//! │   Bundled engine    │     │  Shared library  │
//! │ WAL + MemTable +    │     │    (dlopen)      │
//! │ sorted tables       │     └──────────────────┘
//! └─────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod native;
pub mod store;
pub mod lock;
pub mod persistent;
pub mod shelf;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, Result};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use codec::{Key, ObjectFormat, Value, ValueCodec};
pub use native::{ensure_initialized, NativeApi};
pub use store::{Location, ScanIter, Store};
pub use lock::{FileLock, LockGuard};
pub use persistent::{Collection, Mutation, Persistent};
pub use shelf::{Shelf, ShelfScan};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of atlasdict
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
