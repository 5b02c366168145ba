//! Store Handle
//!
//! Owns one open engine handle and wraps the raw engine calls.
//!
//! ## Responsibilities
//! - Validate keys before anything reaches the engine
//! - Copy every engine-owned buffer and free it exactly once
//! - Translate status codes and diagnostics into `AtlasError`
//! - Close the handle exactly once (explicitly or on drop)

use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Buf, Bytes};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::{AtlasError, Result};
use crate::native::error_register::{is_not_found, last_error};
use crate::native::{self, NativeApi};

/// What an engine handle was opened on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Disk(PathBuf),
    Memory,
}

/// One open engine instance
pub struct Store {
    api: &'static NativeApi,

    /// 0 once closed
    handle: AtomicUsize,

    location: Location,
}

impl Store {
    /// Open a store on `path`, or an in-memory store
    ///
    /// Exactly one of `path` and `in_memory` must be given. Loads the native
    /// library on first use.
    pub fn open(path: Option<&Path>, in_memory: bool, library_path: Option<&Path>) -> Result<Self> {
        let api = native::ensure_initialized(library_path)?;
        Self::open_with_api(api, path, in_memory)
    }

    /// Open the store described by a config
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::open(
            config.storage_path(),
            config.in_memory,
            config.library_path.as_deref(),
        )
    }

    /// Open through an explicit function table
    pub fn open_with_api(api: &'static NativeApi, path: Option<&Path>, in_memory: bool) -> Result<Self> {
        let (c_path, location) = match (path, in_memory) {
            (Some(_), true) => {
                return Err(AtlasError::Config(
                    "a storage path and in_memory are mutually exclusive".to_string(),
                ))
            }
            (None, false) => {
                return Err(AtlasError::Config(
                    "a filesystem path is required unless in_memory is set".to_string(),
                ))
            }
            (None, true) => (CString::default(), Location::Memory),
            (Some(path), false) => {
                let raw = path.to_string_lossy().into_owned();
                if raw.is_empty() {
                    return Err(AtlasError::Config("storage path is empty".to_string()));
                }
                let c_path = CString::new(raw).map_err(|_| {
                    AtlasError::Config(format!("storage path contains a NUL byte: {}", path.display()))
                })?;
                (c_path, Location::Disk(path.to_path_buf()))
            }
        };

        // SAFETY: c_path is a valid NUL-terminated string for the call's duration.
        let handle = unsafe { (api.open)(c_path.as_ptr(), c_int::from(in_memory)) };
        if handle == 0 {
            let message = last_error(api).unwrap_or_else(|| "failed to open store".to_string());
            return Err(AtlasError::StorageFailure(message));
        }

        info!(handle, location = ?location, "store opened");

        Ok(Self {
            api,
            handle: AtomicUsize::new(handle),
            location,
        })
    }

    /// Stored bytes for `key`, or `None` when the engine reports a miss
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key_len = checked_key_len(key)?;
        let handle = self.live_handle()?;

        let mut value_len: c_int = 0;
        // SAFETY: key is valid for key_len bytes; value_len is a live local.
        let ptr = unsafe { (self.api.get)(handle, key.as_ptr() as *const c_char, key_len, &mut value_len) };

        if ptr.is_null() {
            if value_len != 0 {
                return Err(AtlasError::StorageFailure(format!(
                    "engine returned a null buffer with length {}",
                    value_len
                )));
            }
            // Engines mark found-empty values with a non-null buffer, so a
            // null result is a miss unless the diagnostic says otherwise.
            return match last_error(self.api) {
                Some(message) if !is_not_found(&message) => Err(AtlasError::StorageFailure(message)),
                _ => Ok(None),
            };
        }

        // SAFETY: the engine returned a buffer of value_len bytes that we own
        // until FreeBuffer; it is copied before being released.
        let value = unsafe {
            let value = std::slice::from_raw_parts(ptr as *const u8, value_len.max(0) as usize).to_vec();
            (self.api.free_buffer)(ptr);
            value
        };
        Ok(Some(value))
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let key_len = checked_key_len(key)?;
        let value_len = c_int::try_from(value.len())
            .map_err(|_| AtlasError::Encoding(format!("value too large: {} bytes", value.len())))?;
        let handle = self.live_handle()?;

        // SAFETY: key and value are valid for their lengths during the call.
        let status = unsafe {
            (self.api.set)(
                handle,
                key.as_ptr() as *const c_char,
                key_len,
                value.as_ptr() as *const c_char,
                value_len,
            )
        };
        self.check_status(status)
    }

    /// Returns true if a key was removed, false if it was absent
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let key_len = checked_key_len(key)?;
        let handle = self.live_handle()?;

        // SAFETY: key is valid for key_len bytes during the call.
        let status = unsafe { (self.api.delete)(handle, key.as_ptr() as *const c_char, key_len) };
        if status == 0 {
            return Ok(true);
        }
        match last_error(self.api) {
            Some(message) if is_not_found(&message) => Ok(false),
            Some(message) => Err(AtlasError::StorageFailure(message)),
            None => Err(AtlasError::StorageFailure("unknown engine error".to_string())),
        }
    }

    /// Force prior writes to durable storage
    pub fn sync(&self) -> Result<()> {
        let handle = self.live_handle()?;
        // SAFETY: plain value call.
        let status = unsafe { (self.api.sync)(handle) };
        self.check_status(status)
    }

    /// Every entry whose key starts with `prefix`, in engine order
    ///
    /// The engine's result is copied once; the iterator parses it lazily.
    pub fn scan(&self, prefix: &[u8]) -> Result<ScanIter> {
        let prefix_len = c_int::try_from(prefix.len())
            .map_err(|_| AtlasError::Encoding(format!("prefix too large: {} bytes", prefix.len())))?;
        let handle = self.live_handle()?;
        let Some(scan) = self.api.scan else {
            return Err(AtlasError::StorageFailure(
                "native library does not export Scan".to_string(),
            ));
        };

        let mut out_len: c_int = 0;
        // SAFETY: prefix is valid for prefix_len bytes; out_len is a live local.
        let ptr = unsafe { scan(handle, prefix.as_ptr() as *const c_char, prefix_len, &mut out_len) };

        if ptr.is_null() {
            return match last_error(self.api) {
                Some(message) if !is_not_found(&message) => Err(AtlasError::StorageFailure(message)),
                _ => Ok(ScanIter::new(Bytes::new())),
            };
        }

        // SAFETY: the engine returned out_len bytes owned by us until FreeBuffer.
        let packed = unsafe {
            let packed = Bytes::copy_from_slice(std::slice::from_raw_parts(
                ptr as *const u8,
                out_len.max(0) as usize,
            ));
            (self.api.free_buffer)(ptr);
            packed
        };
        Ok(ScanIter::new(packed))
    }

    /// Release the engine handle; closing a closed store is a no-op
    pub fn close(&self) -> Result<()> {
        let handle = self.handle.swap(0, Ordering::SeqCst);
        if handle == 0 {
            return Ok(());
        }

        // SAFETY: handle came from Open and is closed exactly once (swap above).
        let status = unsafe { (self.api.close)(handle) };
        info!(handle, location = ?self.location, "store closed");
        self.check_status(status)
    }

    pub fn is_open(&self) -> bool {
        self.handle.load(Ordering::SeqCst) != 0
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn api(&self) -> &'static NativeApi {
        self.api
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn live_handle(&self) -> Result<usize> {
        match self.handle.load(Ordering::SeqCst) {
            0 => Err(AtlasError::NotOpen),
            handle => Ok(handle),
        }
    }

    fn check_status(&self, status: c_int) -> Result<()> {
        if status == 0 {
            return Ok(());
        }
        let message = last_error(self.api).unwrap_or_else(|| "unknown engine error".to_string());
        Err(AtlasError::StorageFailure(message))
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(location = ?self.location, error = %e, "error closing store on drop");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("handle", &self.handle.load(Ordering::SeqCst))
            .field("location", &self.location)
            .finish()
    }
}

/// Empty keys never reach the engine
fn checked_key_len(key: &[u8]) -> Result<c_int> {
    if key.is_empty() {
        return Err(AtlasError::Encoding("empty keys are not supported".to_string()));
    }
    c_int::try_from(key.len())
        .map_err(|_| AtlasError::Encoding(format!("key too large: {} bytes", key.len())))
}

// =============================================================================
// Scan Results
// =============================================================================

/// Lazy parser over a packed scan buffer
///
/// Layout: `[key_len u32 LE][val_len u32 LE][key][value]` repeated.
#[derive(Debug, Clone)]
pub struct ScanIter {
    buf: Bytes,
    failed: bool,
}

impl ScanIter {
    fn new(buf: Bytes) -> Self {
        Self { buf, failed: false }
    }
}

impl Iterator for ScanIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.buf.has_remaining() {
            return None;
        }

        if self.buf.remaining() < 8 {
            self.failed = true;
            return Some(Err(malformed_scan()));
        }
        let key_len = self.buf.get_u32_le() as usize;
        let val_len = self.buf.get_u32_le() as usize;

        if self.buf.remaining() < key_len + val_len {
            self.failed = true;
            return Some(Err(malformed_scan()));
        }
        let key = self.buf.split_to(key_len).to_vec();
        let value = self.buf.split_to(val_len).to_vec();

        Some(Ok((key, value)))
    }
}

fn malformed_scan() -> AtlasError {
    AtlasError::StorageFailure("malformed scan buffer from engine".to_string())
}
