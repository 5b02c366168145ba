//! Native Engine Boundary
//!
//! Everything that crosses into the key-value engine goes through a
//! `NativeApi` function table. The table is filled either from the bundled
//! engine or from a shared library exporting the same symbols.
//!
//! ## Exported Symbols
//! ```text
//! Open(path, inMemory)                       -> handle (0 = failure)
//! Close(handle)                              -> status
//! Set(handle, key, keyLen, value, valueLen)  -> status
//! Get(handle, key, keyLen, *outLen)          -> buffer | null
//! Delete(handle, key, keyLen)                -> status
//! Sync(handle)                               -> status
//! Scan(handle, prefix, prefixLen, *outLen)   -> buffer | null   (optional)
//! LastError()                                -> C string | null
//! FreeCString(str) / FreeBuffer(buf)
//! ```
//!
//! The process loads the table exactly once (`ensure_initialized`); every
//! store shares it.

pub mod bundled;
pub mod error_register;
mod loader;

use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;

pub type OpenFn = unsafe extern "C" fn(path: *const c_char, in_memory: c_int) -> usize;
pub type CloseFn = unsafe extern "C" fn(handle: usize) -> c_int;
pub type SetFn = unsafe extern "C" fn(
    handle: usize,
    key: *const c_char,
    key_len: c_int,
    value: *const c_char,
    value_len: c_int,
) -> c_int;
pub type GetFn = unsafe extern "C" fn(
    handle: usize,
    key: *const c_char,
    key_len: c_int,
    out_len: *mut c_int,
) -> *mut c_char;
pub type DeleteFn = unsafe extern "C" fn(handle: usize, key: *const c_char, key_len: c_int) -> c_int;
pub type SyncFn = unsafe extern "C" fn(handle: usize) -> c_int;
pub type ScanFn = unsafe extern "C" fn(
    handle: usize,
    prefix: *const c_char,
    prefix_len: c_int,
    out_len: *mut c_int,
) -> *mut c_char;
pub type LastErrorFn = unsafe extern "C" fn() -> *mut c_char;
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_char);

/// Where a function table came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    Bundled,
    Dynamic(PathBuf),
}

/// Function table for one engine implementation
#[derive(Debug)]
pub struct NativeApi {
    pub source: LibrarySource,
    pub open: OpenFn,
    pub close: CloseFn,
    pub set: SetFn,
    pub get: GetFn,
    pub delete: DeleteFn,
    pub sync: SyncFn,
    /// Not every engine library exports `Scan`
    pub scan: Option<ScanFn>,
    pub last_error: LastErrorFn,
    pub free_cstring: FreeFn,
    pub free_buffer: FreeFn,
}

static BUNDLED: NativeApi = NativeApi {
    source: LibrarySource::Bundled,
    open: bundled::open,
    close: bundled::close,
    set: bundled::set,
    get: bundled::get,
    delete: bundled::delete,
    sync: bundled::sync,
    scan: Some(bundled::scan),
    last_error: bundled::last_error,
    free_cstring: bundled::free_cstring,
    free_buffer: bundled::free_buffer,
};

static NATIVE: Mutex<Option<&'static NativeApi>> = parking_lot::const_mutex(None);

impl NativeApi {
    /// The engine compiled into this crate
    pub fn bundled() -> &'static NativeApi {
        &BUNDLED
    }
}

/// Load the process-wide function table once
///
/// The first call decides the engine: `library_path` loads a shared library,
/// `None` selects the bundled engine. Later calls return the same table and
/// log when they asked for a different library.
pub fn ensure_initialized(library_path: Option<&Path>) -> Result<&'static NativeApi> {
    let mut slot = NATIVE.lock();

    if let Some(api) = *slot {
        let requested = library_path.map(|p| LibrarySource::Dynamic(p.to_path_buf()));
        if let Some(requested) = requested {
            if requested != api.source {
                warn!(
                    requested = ?requested,
                    loaded = ?api.source,
                    "native library already initialized; ignoring library path override"
                );
            }
        }
        return Ok(api);
    }

    let api: &'static NativeApi = match library_path {
        Some(path) => Box::leak(Box::new(loader::load(path)?)),
        None => &BUNDLED,
    };
    info!(source = ?api.source, "native engine initialized");

    *slot = Some(api);
    Ok(api)
}

/// The table chosen by `ensure_initialized`, if any
pub fn initialized() -> Option<&'static NativeApi> {
    *NATIVE.lock()
}
