//! Bundled Engine
//!
//! A reference engine compiled into the crate and exported through the same
//! C ABI an external engine library provides. It is what `NativeApi::bundled`
//! points at, so the binding layer always goes through raw pointers,
//! C-allocated buffers and the last-error register.
//!
//! ## ABI Conventions
//! - handles are non-zero `usize` ids; 0 means "failed" / "no handle"
//! - status 0 is success, -1 is failure with a message in `LastError`
//! - every call clears or sets the calling thread's last error
//! - buffers returned by `Get`/`Scan`/`LastError` are `malloc`ed and must be
//!   released with `FreeBuffer`/`FreeCString`
//! - `Get` of a stored empty value returns a 1-byte allocation with length 0;
//!   a miss returns null with "Key not found"

mod engine;
mod memtable;
mod table;
mod tables;
mod wal;

pub use engine::{Engine, EngineOptions};
pub use wal::WalSyncStrategy;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AtlasError, Result};

/// Message every miss is reported with
pub const KEY_NOT_FOUND: &str = "Key not found";

static HANDLES: RwLock<BTreeMap<usize, Arc<Engine>>> = parking_lot::const_rwlock(BTreeMap::new());
static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

// =============================================================================
// Register Helpers
// =============================================================================

fn set_error(message: impl Into<String>) -> c_int {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message.into()));
    -1
}

fn clear_error() -> c_int {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
    0
}

/// Register text for an engine error
///
/// Storage failures carry their message bare; the binding adds its own prefix.
fn diagnostic(error: AtlasError) -> String {
    match error {
        AtlasError::StorageFailure(message) => message,
        other => other.to_string(),
    }
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => clear_error(),
        Err(e) => set_error(diagnostic(e)),
    }
}

fn lookup(handle: usize) -> Option<Arc<Engine>> {
    HANDLES.read().get(&handle).cloned()
}

/// Borrow a (pointer, length) pair as a slice
///
/// # Safety
/// `data` must point to `len` readable bytes when `len > 0`.
unsafe fn slice_arg<'a>(data: *const c_char, len: c_int) -> Option<&'a [u8]> {
    if len < 0 || (len > 0 && data.is_null()) {
        return None;
    }
    if len == 0 {
        return Some(&[]);
    }
    Some(std::slice::from_raw_parts(data as *const u8, len as usize))
}

/// Copy bytes into a `malloc`ed buffer (at least one byte long)
fn malloc_copy(bytes: &[u8]) -> *mut c_char {
    // SAFETY: malloc with a non-zero size; the copy stays within the allocation.
    unsafe {
        let buf = libc::malloc(bytes.len().max(1)) as *mut u8;
        if buf.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        buf as *mut c_char
    }
}

/// # Safety
/// `out_len` must be null or valid for a write.
unsafe fn write_len(out_len: *mut c_int, len: c_int) {
    if !out_len.is_null() {
        *out_len = len;
    }
}

// =============================================================================
// Exported ABI
// =============================================================================

/// `Open(path, inMemory) -> handle`
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
pub unsafe extern "C" fn open(path: *const c_char, in_memory: c_int) -> usize {
    let engine = if in_memory != 0 {
        Engine::in_memory(EngineOptions::default())
    } else {
        if path.is_null() {
            set_error("a filesystem path is required unless inMemory is set");
            return 0;
        }
        let raw = CStr::from_ptr(path).to_string_lossy().into_owned();
        if raw.is_empty() {
            set_error("a filesystem path is required unless inMemory is set");
            return 0;
        }
        match Engine::open(Path::new(&raw), EngineOptions::default()) {
            Ok(engine) => engine,
            Err(e) => {
                set_error(diagnostic(e));
                return 0;
            }
        }
    };

    let id = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
    HANDLES.write().insert(id, Arc::new(engine));
    clear_error();
    id
}

/// `Close(handle) -> status`
pub unsafe extern "C" fn close(handle: usize) -> c_int {
    let Some(engine) = HANDLES.write().remove(&handle) else {
        return set_error("invalid handle");
    };
    status(engine.close())
}

/// `Set(handle, key, keyLen, value, valueLen) -> status`
///
/// # Safety
/// `key`/`value` must point to `key_len`/`value_len` readable bytes.
pub unsafe extern "C" fn set(
    handle: usize,
    key: *const c_char,
    key_len: c_int,
    value: *const c_char,
    value_len: c_int,
) -> c_int {
    let Some(engine) = lookup(handle) else {
        return set_error("invalid handle");
    };
    let (Some(key), Some(value)) = (slice_arg(key, key_len), slice_arg(value, value_len)) else {
        return set_error("invalid key or value buffer");
    };
    status(engine.put(key, value))
}

/// `Get(handle, key, keyLen, outLen) -> buffer`
///
/// # Safety
/// `key` must point to `key_len` readable bytes; `out_len` must be writable.
pub unsafe extern "C" fn get(
    handle: usize,
    key: *const c_char,
    key_len: c_int,
    out_len: *mut c_int,
) -> *mut c_char {
    write_len(out_len, 0);
    let Some(engine) = lookup(handle) else {
        set_error("invalid handle");
        return ptr::null_mut();
    };
    let Some(key) = slice_arg(key, key_len) else {
        set_error("invalid key buffer");
        return ptr::null_mut();
    };

    match engine.get(key) {
        Ok(Some(value)) => {
            let buf = malloc_copy(&value);
            if buf.is_null() {
                set_error("malloc failed");
                return ptr::null_mut();
            }
            write_len(out_len, value.len() as c_int);
            clear_error();
            buf
        }
        Ok(None) => {
            set_error(KEY_NOT_FOUND);
            ptr::null_mut()
        }
        Err(e) => {
            set_error(diagnostic(e));
            ptr::null_mut()
        }
    }
}

/// `Delete(handle, key, keyLen) -> status`; a miss fails with "Key not found"
///
/// # Safety
/// `key` must point to `key_len` readable bytes.
pub unsafe extern "C" fn delete(handle: usize, key: *const c_char, key_len: c_int) -> c_int {
    let Some(engine) = lookup(handle) else {
        return set_error("invalid handle");
    };
    let Some(key) = slice_arg(key, key_len) else {
        return set_error("invalid key buffer");
    };
    match engine.delete(key) {
        Ok(true) => clear_error(),
        Ok(false) => set_error(KEY_NOT_FOUND),
        Err(e) => set_error(diagnostic(e)),
    }
}

/// `Sync(handle) -> status`
pub unsafe extern "C" fn sync(handle: usize) -> c_int {
    match lookup(handle) {
        Some(engine) => status(engine.sync()),
        None => set_error("invalid handle"),
    }
}

/// `Scan(handle, prefix, prefixLen, outLen) -> buffer`
///
/// The buffer holds `[key_len u32 LE][val_len u32 LE][key][value]` repeated.
/// No matches returns null with length 0 and a cleared error.
///
/// # Safety
/// `prefix` must point to `prefix_len` readable bytes; `out_len` must be writable.
pub unsafe extern "C" fn scan(
    handle: usize,
    prefix: *const c_char,
    prefix_len: c_int,
    out_len: *mut c_int,
) -> *mut c_char {
    write_len(out_len, 0);
    let Some(engine) = lookup(handle) else {
        set_error("invalid handle");
        return ptr::null_mut();
    };
    let Some(prefix) = slice_arg(prefix, prefix_len) else {
        set_error("invalid prefix buffer");
        return ptr::null_mut();
    };

    let entries = match engine.scan(prefix) {
        Ok(entries) => entries,
        Err(e) => {
            set_error(diagnostic(e));
            return ptr::null_mut();
        }
    };
    if entries.is_empty() {
        clear_error();
        return ptr::null_mut();
    }

    let mut packed = Vec::new();
    for (key, value) in &entries {
        packed.extend_from_slice(&(key.len() as u32).to_le_bytes());
        packed.extend_from_slice(&(value.len() as u32).to_le_bytes());
        packed.extend_from_slice(key);
        packed.extend_from_slice(value);
    }
    if packed.len() > c_int::MAX as usize {
        set_error("scan result too large");
        return ptr::null_mut();
    }

    let buf = malloc_copy(&packed);
    if buf.is_null() {
        set_error("malloc failed");
        return ptr::null_mut();
    }
    write_len(out_len, packed.len() as c_int);
    clear_error();
    buf
}

/// `LastError() -> C string`, null when the last call succeeded
pub unsafe extern "C" fn last_error() -> *mut c_char {
    let message = LAST_ERROR.with(|slot| slot.borrow().clone());
    let Some(message) = message else {
        return ptr::null_mut();
    };
    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
    malloc_copy(text.as_bytes_with_nul())
}

/// Release a string returned by `LastError`
///
/// # Safety
/// `ptr` must be null or a pointer returned by `last_error`, freed once.
pub unsafe extern "C" fn free_cstring(ptr: *mut c_char) {
    if !ptr.is_null() {
        libc::free(ptr as *mut libc::c_void);
    }
}

/// Release a buffer returned by `Get` or `Scan`
///
/// # Safety
/// `ptr` must be null or a pointer returned by `get`/`scan`, freed once.
pub unsafe extern "C" fn free_buffer(ptr: *mut c_char) {
    if !ptr.is_null() {
        libc::free(ptr as *mut libc::c_void);
    }
}
